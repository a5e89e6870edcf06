//! Datacenter member pods

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;

use k8ssandra_common::crd::CassandraDatacenter;
use k8ssandra_common::kube_utils::cancellable;
use k8ssandra_common::{Error, DATACENTER_LABEL};

use crate::client::ControlPlane;

/// Label selector matching the pods of one datacenter
pub fn datacenter_selector(datacenter: &str) -> String {
    format!("{}={}", DATACENTER_LABEL, datacenter)
}

/// Resolves the member pods of a datacenter
pub struct PodLocator {
    client: Arc<dyn ControlPlane>,
}

impl PodLocator {
    /// Create a locator
    pub fn new(client: Arc<dyn ControlPlane>) -> Self {
        Self { client }
    }

    /// List the pods belonging to a datacenter
    ///
    /// No matching pods is an empty list, not an error. Only pods in the
    /// datacenter's own namespace are considered; a datacenter without a
    /// namespace is rejected since name alone does not identify it.
    pub async fn pods_for(
        &self,
        datacenter: &CassandraDatacenter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Pod>, Error> {
        let name = datacenter.name_any();
        let namespace = datacenter.namespace().ok_or_else(|| {
            Error::validation(format!("CassandraDatacenter {} has no namespace", name))
        })?;

        let selector = datacenter_selector(&name);
        let operation = format!("list pods of {}", datacenter.reference());
        let pods = cancellable(cancel, &operation, self.client.list_pods(&namespace, &selector))
            .await?;

        Ok(pods
            .into_iter()
            .filter(|pod| pod.namespace().as_deref() == Some(namespace.as_str()))
            .collect())
    }
}
