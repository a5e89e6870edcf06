//! Database user provisioning
//!
//! Roles are created through the management endpoint of one member pod;
//! the database replicates them to the rest of the cluster.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use k8ssandra_common::kube_utils::cancellable;
use k8ssandra_common::Error;

use crate::client::ControlPlane;
use crate::datacenter::DatacenterController;
use crate::mgmtapi::{ManagementApi, NodeEndpoint, RoleRequest};
use crate::pods::PodLocator;
use crate::secrets::read_target_path;

/// Pick the endpoint of the first pod with an assigned IP
pub fn target_endpoint(pods: &[Pod]) -> Option<NodeEndpoint> {
    pods.iter().find_map(NodeEndpoint::from_pod)
}

/// Creates database roles in a datacenter
pub struct UserProvisioner {
    datacenters: DatacenterController,
    pods: PodLocator,
    mgmt: Arc<dyn ManagementApi>,
}

impl UserProvisioner {
    /// Create a provisioner
    pub fn new(client: Arc<dyn ControlPlane>, mgmt: Arc<dyn ManagementApi>) -> Self {
        Self {
            datacenters: DatacenterController::new(Arc::clone(&client)),
            pods: PodLocator::new(client),
            mgmt,
        }
    }

    /// Create one role
    pub async fn add_user(
        &self,
        datacenter: &str,
        namespace: &str,
        username: &str,
        password: &str,
        superuser: bool,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let users = BTreeMap::from([(username.to_string(), password.to_string())]);
        self.add_users(datacenter, namespace, &users, superuser, cancel)
            .await
    }

    /// Create every role found at `path`
    ///
    /// `path` is either a mounted secret directory or a `username=password`
    /// file.
    pub async fn add_users_from_path(
        &self,
        datacenter: &str,
        namespace: &str,
        path: &Path,
        superuser: bool,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let users = read_target_path(path).await?;
        debug!(path = %path.display(), count = users.len(), "Read users");
        self.add_users(datacenter, namespace, &users, superuser, cancel)
            .await
    }

    /// Create roles in username order, stopping at the first failure
    pub async fn add_users(
        &self,
        datacenter: &str,
        namespace: &str,
        users: &BTreeMap<String, String>,
        superuser: bool,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let endpoint = self.endpoint(datacenter, namespace, cancel).await?;

        for (username, password) in users {
            let role = RoleRequest {
                username: username.clone(),
                password: password.clone(),
                superuser,
            };
            let operation = format!("create role {} on pod {}", username, endpoint.pod);
            cancellable(cancel, &operation, self.mgmt.create_role(&endpoint, &role)).await?;
        }

        info!(
            datacenter = %datacenter,
            namespace = %namespace,
            count = users.len(),
            superuser,
            "Users added"
        );
        Ok(())
    }

    async fn endpoint(
        &self,
        datacenter: &str,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<NodeEndpoint, Error> {
        let dc = self.datacenters.get(datacenter, namespace, cancel).await?;
        let pods = self.pods.pods_for(&dc, cancel).await?;

        let endpoint = target_endpoint(&pods)
            .ok_or_else(|| Error::no_member_available(dc.name_any(), namespace))?;
        debug!(pod = %endpoint.pod, url = %endpoint.base_url(), "Targeting management endpoint");
        Ok(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use k8s_openapi::api::core::v1::PodStatus;
    use kube::api::ObjectMeta;

    use k8ssandra_common::crd::CassandraDatacenter;

    use crate::client::MockControlPlane;
    use crate::mgmtapi::MockManagementApi;

    fn pod(name: &str, ip: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("cass".to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                pod_ip: ip.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn control_plane(pods: Vec<Pod>) -> MockControlPlane {
        let mut mock = MockControlPlane::new();
        mock.expect_get_datacenter().returning(|name, namespace| {
            Ok(Some(CassandraDatacenter::with_identity(name, namespace, false)))
        });
        mock.expect_list_pods().returning(move |_, _| Ok(pods.clone()));
        mock
    }

    #[test]
    fn test_target_skips_pods_without_ip() {
        let pods = vec![pod("p0", None), pod("p1", Some("10.0.0.2")), pod("p2", Some("10.0.0.3"))];
        assert_eq!(target_endpoint(&pods).unwrap().pod, "p1");
        assert_eq!(target_endpoint(&[]), None);
    }

    #[tokio::test]
    async fn story_single_user_is_created_on_first_reachable_pod() {
        let mut mgmt = MockManagementApi::new();
        mgmt.expect_create_role()
            .withf(|endpoint, role| {
                endpoint.pod == "p1"
                    && endpoint.address == "10.0.0.2"
                    && role.username == "alice"
                    && role.password == "pw"
                    && role.superuser
            })
            .times(1)
            .returning(|_, _| Ok(()));

        UserProvisioner::new(
            Arc::new(control_plane(vec![pod("p0", None), pod("p1", Some("10.0.0.2"))])),
            Arc::new(mgmt),
        )
        .add_user("dc1", "cass", "alice", "pw", true, &CancellationToken::new())
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_no_reachable_pod_is_no_member_available() {
        let mut mgmt = MockManagementApi::new();
        mgmt.expect_create_role().never();

        let err = UserProvisioner::new(
            Arc::new(control_plane(vec![pod("p0", None)])),
            Arc::new(mgmt),
        )
        .add_user("dc1", "cass", "alice", "pw", false, &CancellationToken::new())
        .await
        .unwrap_err();

        assert!(matches!(err, Error::NoMemberAvailable { .. }));
        assert_eq!(err.to_string(), "no member pods available for datacenter cass/dc1");
    }

    #[tokio::test]
    async fn test_missing_datacenter_is_not_found() {
        let mut cp = MockControlPlane::new();
        cp.expect_get_datacenter().returning(|_, _| Ok(None));
        cp.expect_list_pods().never();

        let err = UserProvisioner::new(Arc::new(cp), Arc::new(MockManagementApi::new()))
            .add_user("dc1", "cass", "alice", "pw", false, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn story_users_from_file_are_applied_in_order_until_failure() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("users");
        std::fs::write(&file, "carol=c\nalice=a\nbob=b\n").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut mgmt = MockManagementApi::new();
        let log = Arc::clone(&seen);
        mgmt.expect_create_role().returning(move |endpoint, role| {
            log.lock().unwrap().push(role.username.clone());
            if role.username == "bob" {
                Err(Error::management_api(&endpoint.pod, "500 Internal Server Error"))
            } else {
                Ok(())
            }
        });

        let err = UserProvisioner::new(
            Arc::new(control_plane(vec![pod("p0", Some("10.0.0.1"))])),
            Arc::new(mgmt),
        )
        .add_users_from_path("dc1", "cass", &file, false, &CancellationToken::new())
        .await
        .unwrap_err();

        assert!(matches!(err, Error::ManagementApi { .. }));
        assert_eq!(*seen.lock().unwrap(), ["alice", "bob"]);
    }
}
