//! kubectl-k8ssandra
//!
//! kubectl plugin for stopping, starting and restarting k8ssandra
//! datacenters and managing their users.

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use k8ssandra_cli::Cli;
use k8ssandra_common::telemetry::{init_logging, LoggingConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(LoggingConfig {
        format: cli.log_format,
        ..Default::default()
    }) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling...");
                cancel.cancel();
            }
        }
    });

    match cli.run(cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
