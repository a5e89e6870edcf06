//! `secrets mount`

use std::sync::Arc;

use clap::{Args, Subcommand};
use tokio_util::sync::CancellationToken;

use k8ssandra_ops::secrets::{mount_secrets, parse_injections, SecretInjection};
use k8ssandra_ops::KubeControlPlane;

use crate::config::KubeArgs;
use crate::{Error, Result};

/// Work with secret material
#[derive(Subcommand, Debug)]
pub enum SecretsCommand {
    /// Mount secrets to the local file system
    Mount(MountArgs),
}

/// Arguments of `secrets mount`
#[derive(Args, Debug, Clone, Default)]
pub struct MountArgs {
    /// JSON array of {"secretName": ..., "path": ...} entries
    pub injections: Option<String>,
}

impl MountArgs {
    /// Parse the injection list
    pub fn injections(&self) -> Result<Vec<SecretInjection>> {
        let raw = self
            .injections
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| Error::validation("no injection string provided"))?;
        Ok(parse_injections(raw)?)
    }
}

/// Run a secrets subcommand
pub async fn run(
    command: SecretsCommand,
    kube: &KubeArgs,
    cancel: CancellationToken,
) -> Result<()> {
    match command {
        SecretsCommand::Mount(args) => {
            let injections = args.injections()?;
            let session = kube.connect().await?;
            mount_secrets(
                Arc::new(KubeControlPlane::new(session.client)),
                &session.namespace,
                &injections,
                &cancel,
            )
            .await?;
            Ok(())
        }
    }
}
