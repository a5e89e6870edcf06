//! kubectl-k8ssandra CLI library

pub mod commands;
pub mod config;
pub mod error;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use k8ssandra_common::telemetry::LogFormat;

use commands::operate::{OperateArgs, RestartArgs};
use commands::secrets::SecretsCommand;
use commands::users::UsersCommand;
use config::KubeArgs;

/// Operate k8ssandra datacenters
#[derive(Parser, Debug)]
#[command(name = "kubectl-k8ssandra")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log output format: text or json
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    #[command(flatten)]
    pub kube: KubeArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Restart an existing shutdown Cassandra cluster
    Start(OperateArgs),
    /// Shutdown a running Cassandra cluster
    Stop(OperateArgs),
    /// Request a rolling restart of a running Cassandra cluster
    Restart(RestartArgs),
    /// Manage database users
    #[command(subcommand)]
    Users(UsersCommand),
    /// Work with secret material
    #[command(subcommand)]
    Secrets(SecretsCommand),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let kube = &self.kube;
        match self.command {
            Commands::Start(args) => commands::operate::start(args, kube, cancel).await,
            Commands::Stop(args) => commands::operate::stop(args, kube, cancel).await,
            Commands::Restart(args) => commands::operate::restart(args, kube, cancel).await,
            Commands::Users(cmd) => commands::users::run(cmd, kube, cancel).await,
            Commands::Secrets(cmd) => commands::secrets::run(cmd, kube, cancel).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::PathBuf;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("kubectl-k8ssandra").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_stop_with_wait_and_namespace() {
        let cli = parse(&["stop", "dc1", "-w", "-n", "cass"]);
        assert_eq!(cli.kube.namespace.as_deref(), Some("cass"));
        match cli.command {
            Commands::Stop(args) => {
                assert_eq!(args.datacenter.as_deref(), Some("dc1"));
                assert!(args.wait);
                assert_eq!(args.timeout, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_restart_with_rack_lock_and_timeout() {
        let cli = parse(&[
            "restart",
            "dc1",
            "--rack",
            "r1",
            "--timeout",
            "900",
            "--lock",
            "dc1-ops",
            "--kubeconfig",
            "/tmp/kc",
        ]);
        assert_eq!(cli.kube.kubeconfig, Some(PathBuf::from("/tmp/kc")));
        match cli.command {
            Commands::Restart(args) => {
                assert_eq!(args.rack.as_deref(), Some("r1"));
                assert_eq!(args.target.timeout, Some(900));
                assert_eq!(args.target.lock.lock.as_deref(), Some("dc1-ops"));
                assert!(!args.target.wait);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_lock_namespace_requires_lock() {
        let result = Cli::try_parse_from([
            "kubectl-k8ssandra",
            "start",
            "dc1",
            "--lock-namespace",
            "ops",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_users_add_flags() {
        let cli = parse(&[
            "users",
            "add",
            "--dc",
            "dc1",
            "-u",
            "alice",
            "-p",
            "pw",
            "--superuser",
            "false",
        ]);
        match cli.command {
            Commands::Users(UsersCommand::Add(args)) => {
                assert_eq!(args.datacenter.as_deref(), Some("dc1"));
                assert_eq!(args.username.as_deref(), Some("alice"));
                assert!(!args.superuser);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_superuser_defaults_to_true() {
        let cli = parse(&["users", "add", "--dc", "dc1", "--path", "/tmp/users"]);
        match cli.command {
            Commands::Users(UsersCommand::Add(args)) => assert!(args.superuser),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_bare_superuser_flag_means_true() {
        let cli = parse(&[
            "users",
            "add",
            "--dc",
            "dc1",
            "--path",
            "/tmp/users.txt",
            "--superuser",
        ]);
        match cli.command {
            Commands::Users(UsersCommand::Add(args)) => {
                assert!(args.superuser);
                assert_eq!(args.path, Some(PathBuf::from("/tmp/users.txt")));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_log_format_is_global() {
        let cli = parse(&["secrets", "mount", "[]", "--log-format", "json"]);
        assert_eq!(cli.log_format, LogFormat::Json);
        let bad_format =
            Cli::try_parse_from(["kubectl-k8ssandra", "--log-format", "xml", "stop", "dc1"]);
        assert!(bad_format.is_err());
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
