//! `users add`

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Subcommand};
use tokio_util::sync::CancellationToken;

use k8ssandra_ops::mgmtapi::HttpManagementApi;
use k8ssandra_ops::{KubeControlPlane, UserProvisioner};

use crate::config::KubeArgs;
use crate::{Error, Result};

/// Manage database users
#[derive(Subcommand, Debug)]
pub enum UsersCommand {
    /// Add new users to a CassandraDatacenter installation
    Add(AddArgs),
}

/// Arguments of `users add`
#[derive(Args, Debug, Clone, Default)]
pub struct AddArgs {
    /// Target datacenter
    #[arg(long = "dc")]
    pub datacenter: Option<String>,

    /// Users to add: a mounted secret directory or a file of username=password lines
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Username to add
    #[arg(short = 'u', long)]
    pub username: Option<String>,

    /// Password to set for the user
    #[arg(short = 'p', long)]
    pub password: Option<String>,

    /// Create users as superusers
    #[arg(
        long,
        default_value_t = true,
        num_args = 0..=1,
        default_missing_value = "true",
        action = clap::ArgAction::Set
    )]
    pub superuser: bool,
}

/// Where the users come from
#[derive(Debug, PartialEq, Eq)]
pub enum UserSource {
    /// Directory or file on disk
    Path(PathBuf),
    /// A single user given on the command line
    Credentials {
        /// Username
        username: String,
        /// Password
        password: String,
    },
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl AddArgs {
    /// Check flag combinations and return the target datacenter and source
    pub fn validate(&self) -> Result<(String, UserSource)> {
        let datacenter = non_empty(&self.datacenter)
            .ok_or_else(|| Error::validation("target CassandraDatacenter is required"))?;

        let path = self.path.as_ref().filter(|p| !p.as_os_str().is_empty());
        let username = non_empty(&self.username);
        let password = non_empty(&self.password);

        if path.is_some() && username.is_some() {
            return Err(Error::validation(
                "either --path or --username is allowed, not both",
            ));
        }

        if password.is_some() && username.is_none() {
            return Err(Error::validation(
                "if --password is set, --username is required",
            ));
        }

        let source = match (path, username, password) {
            (Some(path), _, _) => UserSource::Path(path.clone()),
            (None, Some(username), Some(password)) => UserSource::Credentials {
                username: username.to_string(),
                password: password.to_string(),
            },
            _ => {
                return Err(Error::validation(
                    "either --path or both --username and --password are required",
                ))
            }
        };

        Ok((datacenter.to_string(), source))
    }
}

/// Run a users subcommand
pub async fn run(command: UsersCommand, kube: &KubeArgs, cancel: CancellationToken) -> Result<()> {
    match command {
        UsersCommand::Add(args) => add(args, kube, cancel).await,
    }
}

async fn add(args: AddArgs, kube: &KubeArgs, cancel: CancellationToken) -> Result<()> {
    let (datacenter, source) = args.validate()?;
    let session = kube.connect().await?;

    let provisioner = UserProvisioner::new(
        Arc::new(KubeControlPlane::new(session.client)),
        Arc::new(HttpManagementApi::new()?),
    );

    match source {
        UserSource::Path(path) => {
            provisioner
                .add_users_from_path(
                    &datacenter,
                    &session.namespace,
                    &path,
                    args.superuser,
                    &cancel,
                )
                .await?;
            println!("Users from {} added to datacenter {}", path.display(), datacenter);
        }
        UserSource::Credentials { username, password } => {
            provisioner
                .add_user(
                    &datacenter,
                    &session.namespace,
                    &username,
                    &password,
                    args.superuser,
                    &cancel,
                )
                .await?;
            println!("User {} added to datacenter {}", username, datacenter);
        }
    }
    Ok(())
}
