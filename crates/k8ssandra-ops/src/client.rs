//! Control-plane access for lifecycle operations
//!
//! Every Kubernetes call made by this crate goes through [`ControlPlane`] so
//! the controllers can be exercised against mocks and in-memory fakes.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::api::{Api, ListParams, PostParams};
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use k8ssandra_common::crd::{CassandraDatacenter, CassandraTask};
use k8ssandra_common::{Error, FIELD_MANAGER};

/// Trait abstracting the Kubernetes operations used by the controllers
///
/// Lookups return `Ok(None)` for absent resources; callers decide whether
/// absence is an error.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Get a CassandraDatacenter by identity
    async fn get_datacenter(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<CassandraDatacenter>, Error>;

    /// Replace a CassandraDatacenter
    ///
    /// The write carries the resourceVersion that was read; a stale version
    /// fails with `Error::Conflict`.
    async fn replace_datacenter(
        &self,
        datacenter: &CassandraDatacenter,
    ) -> Result<CassandraDatacenter, Error>;

    /// Create a CassandraTask; an existing name fails with `Error::AlreadyExists`
    async fn create_task(&self, task: &CassandraTask) -> Result<CassandraTask, Error>;

    /// Get a CassandraTask by identity
    async fn get_task(&self, name: &str, namespace: &str) -> Result<Option<CassandraTask>, Error>;

    /// List pods in a namespace matching a label selector
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, Error>;

    /// Get a Secret by identity
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error>;
}

/// Real Kubernetes client implementation
pub struct KubeControlPlane {
    client: Client,
}

impl KubeControlPlane {
    /// Create a new KubeControlPlane wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn get_datacenter(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<CassandraDatacenter>, Error> {
        let api: Api<CassandraDatacenter> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(dc) => Ok(Some(dc)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn replace_datacenter(
        &self,
        datacenter: &CassandraDatacenter,
    ) -> Result<CassandraDatacenter, Error> {
        let name = datacenter.name_any();
        let namespace = datacenter.namespace().unwrap_or_default();
        let api: Api<CassandraDatacenter> = Api::namespaced(self.client.clone(), &namespace);

        api.replace(&name, &Self::post_params(), datacenter)
            .await
            .map_err(|e| Error::from_kube(e, "CassandraDatacenter", &name, &namespace))
    }

    async fn create_task(&self, task: &CassandraTask) -> Result<CassandraTask, Error> {
        let name = task.name_any();
        let namespace = task.namespace().unwrap_or_default();
        let api: Api<CassandraTask> = Api::namespaced(self.client.clone(), &namespace);

        api.create(&Self::post_params(), task)
            .await
            .map_err(|e| Error::from_kube(e, "CassandraTask", &name, &namespace))
    }

    async fn get_task(&self, name: &str, namespace: &str) -> Result<Option<CassandraTask>, Error> {
        let api: Api<CassandraTask> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(task) => Ok(Some(task)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api.list(&ListParams::default().labels(label_selector)).await?;
        debug!(
            namespace = %namespace,
            selector = %label_selector,
            count = pods.items.len(),
            "Listed pods"
        );
        Ok(pods.items)
    }

    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(secret) => Ok(Some(secret)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
