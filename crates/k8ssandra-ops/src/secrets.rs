//! Secret material on the local filesystem
//!
//! Two layouts are understood when reading credentials:
//! - a directory in the mounted-secret layout, holding `username` and
//!   `password` files (one pair)
//! - a file of `username=password` lines
//!
//! Mounting writes each key of a Secret to its own file under
//! `<path>/<secretName>/`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use k8ssandra_common::kube_utils::cancellable;
use k8ssandra_common::Error;

use crate::client::ControlPlane;

/// Read users and passwords from a secret directory or a credentials file
///
/// Entries come back sorted by username.
pub async fn read_target_path(path: &Path) -> Result<BTreeMap<String, String>, Error> {
    let metadata = fs::metadata(path)
        .await
        .map_err(|e| Error::io(format!("reading {}", path.display()), e))?;

    if metadata.is_dir() {
        read_secret_mount(path).await
    } else {
        read_credentials_file(path).await
    }
}

async fn read_file(file: &Path) -> Result<String, Error> {
    fs::read_to_string(file)
        .await
        .map_err(|e| Error::io(format!("reading {}", file.display()), e))
}

async fn read_secret_mount(path: &Path) -> Result<BTreeMap<String, String>, Error> {
    let username = read_file(&path.join("username")).await?;
    let password = read_file(&path.join("password")).await?;
    Ok(BTreeMap::from([(username, password)]))
}

async fn read_credentials_file(path: &Path) -> Result<BTreeMap<String, String>, Error> {
    let contents = read_file(path).await?;

    Ok(contents
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(user, pass)| (user.to_string(), pass.to_string()))
        .collect())
}

/// One secret to write to the local filesystem
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretInjection {
    /// Secret name, also the directory created under `path`
    pub secret_name: String,
    /// Parent directory
    pub path: PathBuf,
}

/// Parse a JSON array of injections
pub fn parse_injections(raw: &str) -> Result<Vec<SecretInjection>, Error> {
    serde_json::from_str(raw)
        .map_err(|e| Error::serialization(format!("invalid secret injections: {}", e)))
}

/// Create `<path>/<secret_name>` with mode 0750; an existing directory is fine
pub async fn create_secret_dir(path: &Path, secret_name: &str) -> Result<PathBuf, Error> {
    let dir = path.join(secret_name);
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o750);
    builder
        .create(&dir)
        .await
        .map_err(|e| Error::io(format!("creating {}", dir.display()), e))?;
    Ok(dir)
}

/// Write one file per key, named after the key
pub async fn write_secret_data(dir: &Path, data: &BTreeMap<String, Vec<u8>>) -> Result<(), Error> {
    for (key, value) in data {
        let file = dir.join(key);
        fs::write(&file, value)
            .await
            .map_err(|e| Error::io(format!("writing {}", file.display()), e))?;
        debug!(file = %file.display(), "Wrote secret key");
    }
    Ok(())
}

/// Fetch each injected Secret and write it below its path
///
/// Stops at the first missing Secret or filesystem error.
pub async fn mount_secrets(
    client: Arc<dyn ControlPlane>,
    namespace: &str,
    injections: &[SecretInjection],
    cancel: &CancellationToken,
) -> Result<(), Error> {
    for injection in injections {
        let operation = format!("get Secret {}/{}", namespace, injection.secret_name);
        let secret = cancellable(
            cancel,
            &operation,
            client.get_secret(&injection.secret_name, namespace),
        )
        .await?
        .ok_or_else(|| Error::not_found("Secret", &injection.secret_name, namespace))?;

        let dir = create_secret_dir(&injection.path, &injection.secret_name).await?;
        let data: BTreeMap<String, Vec<u8>> = secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect();
        write_secret_data(&dir, &data).await?;

        info!(
            secret = %injection.secret_name,
            path = %dir.display(),
            keys = data.len(),
            "Mounted secret"
        );
    }
    Ok(())
}
