//! Cluster access and local configuration
//!
//! The kubeconfig resolution chain (highest priority first):
//! 1. Explicit `--kubeconfig` flag
//! 2. `K8SSANDRA_KUBECONFIG` environment variable
//! 3. Fall back to kube default (`KUBECONFIG` env / `~/.kube/config` / in-cluster)
//!
//! The namespace comes from `-n/--namespace`, then the selected context,
//! then `default`.

use std::path::{Path, PathBuf};

use clap::Args;
use kube::Client;

use k8ssandra_common::kube_utils::{create_client, ClientOptions, DEFAULT_NAMESPACE};

use crate::Result;

/// Environment variable naming a kubeconfig for this tool only
pub const KUBECONFIG_ENV: &str = "K8SSANDRA_KUBECONFIG";

/// Flags selecting the cluster and namespace
#[derive(Args, Debug, Clone, Default)]
pub struct KubeArgs {
    /// Path to the kubeconfig file
    #[arg(long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use
    #[arg(long, global = true)]
    pub context: Option<String>,

    /// Namespace of the target resources
    #[arg(short = 'n', long, global = true)]
    pub namespace: Option<String>,
}

/// Connected client plus the namespace commands operate in
pub struct KubeSession {
    /// Kubernetes client
    pub client: Client,
    /// Resolved namespace
    pub namespace: String,
}

impl KubeArgs {
    /// Build a client from the resolution chain and resolve the namespace
    pub async fn connect(&self) -> Result<KubeSession> {
        let kubeconfig = resolve_kubeconfig(self.kubeconfig.as_deref());
        let (client, context_namespace) = create_client(ClientOptions {
            kubeconfig: kubeconfig.as_deref(),
            context: self.context.as_deref(),
        })
        .await?;

        Ok(KubeSession {
            client,
            namespace: resolve_namespace(self.namespace.as_deref(), &context_namespace),
        })
    }
}

/// Resolve a kubeconfig path using the priority chain.
///
/// Returns `None` to use kube defaults.
pub fn resolve_kubeconfig(explicit: Option<&Path>) -> Option<PathBuf> {
    resolve_kubeconfig_from(explicit, std::env::var(KUBECONFIG_ENV).ok())
}

fn resolve_kubeconfig_from(explicit: Option<&Path>, env: Option<String>) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| env.filter(|p| !p.is_empty()).map(PathBuf::from))
}

/// Pick the namespace: flag, then context, then `default`
pub fn resolve_namespace(flag: Option<&str>, context_namespace: &str) -> String {
    flag.filter(|ns| !ns.is_empty())
        .or(Some(context_namespace).filter(|ns| !ns.is_empty()))
        .unwrap_or(DEFAULT_NAMESPACE)
        .to_string()
}

/// Hostname used to build the lease holder identity
pub fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_kubeconfig_explicit_wins() {
        let result = resolve_kubeconfig_from(
            Some(Path::new("/explicit/path")),
            Some("/env/path".to_string()),
        );
        assert_eq!(result, Some(PathBuf::from("/explicit/path")));
    }

    #[test]
    fn resolve_kubeconfig_env_before_defaults() {
        let result = resolve_kubeconfig_from(None, Some("/env/path".to_string()));
        assert_eq!(result, Some(PathBuf::from("/env/path")));
        assert_eq!(resolve_kubeconfig_from(None, Some(String::new())), None);
    }

    #[test]
    fn resolve_kubeconfig_none_falls_back_to_defaults() {
        assert_eq!(resolve_kubeconfig_from(None, None), None);
    }

    #[test]
    fn namespace_resolution_order() {
        assert_eq!(resolve_namespace(Some("cass"), "ctx"), "cass");
        assert_eq!(resolve_namespace(Some(""), "ctx"), "ctx");
        assert_eq!(resolve_namespace(None, "ctx"), "ctx");
        assert_eq!(resolve_namespace(None, ""), "default");
    }

    #[test]
    fn hostname_is_never_empty() {
        assert!(!local_hostname().is_empty());
    }
}
