//! Client for the per-node management API sidecar
//!
//! Each Cassandra pod runs an HTTP management endpoint next to the database
//! process. Only role creation is used here.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use k8ssandra_common::Error;

/// Container running the database and its management endpoint
pub const CASSANDRA_CONTAINER: &str = "cassandra";

/// Named container port of the management endpoint
pub const MGMT_API_PORT_NAME: &str = "mgmt-api-http";

/// Management endpoint port when the pod does not declare one
pub const DEFAULT_MGMT_API_PORT: u16 = 8080;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Address of one node's management endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeEndpoint {
    /// Pod the endpoint belongs to
    pub pod: String,
    /// Pod IP
    pub address: String,
    /// Management API port
    pub port: u16,
}

impl NodeEndpoint {
    /// Resolve the endpoint of a pod, `None` until the pod has an IP
    pub fn from_pod(pod: &Pod) -> Option<Self> {
        let address = pod
            .status
            .as_ref()
            .and_then(|s| s.pod_ip.clone())
            .filter(|ip| !ip.is_empty())?;

        let port = pod
            .spec
            .as_ref()
            .and_then(|spec| {
                spec.containers
                    .iter()
                    .find(|c| c.name == CASSANDRA_CONTAINER)
            })
            .and_then(|c| c.ports.as_ref())
            .and_then(|ports| {
                ports
                    .iter()
                    .find(|p| p.name.as_deref() == Some(MGMT_API_PORT_NAME))
            })
            .and_then(|p| u16::try_from(p.container_port).ok())
            .unwrap_or(DEFAULT_MGMT_API_PORT);

        Some(Self {
            pod: pod.name_any(),
            address,
            port,
        })
    }

    /// Base URL of the endpoint
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }
}

/// Role to create through the management endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct RoleRequest {
    /// Role name
    pub username: String,
    /// Role password
    pub password: String,
    /// Grant superuser
    pub superuser: bool,
}

impl std::fmt::Debug for RoleRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleRequest")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("superuser", &self.superuser)
            .finish()
    }
}

/// Operations on a node's management endpoint
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ManagementApi: Send + Sync {
    /// Create a login role, or update it if it exists
    async fn create_role(&self, endpoint: &NodeEndpoint, role: &RoleRequest) -> Result<(), Error>;
}

/// Management API client over HTTP
pub struct HttpManagementApi {
    http: reqwest::Client,
}

impl HttpManagementApi {
    /// Create a client with the default request timeout
    pub fn new() -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::validation(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ManagementApi for HttpManagementApi {
    async fn create_role(&self, endpoint: &NodeEndpoint, role: &RoleRequest) -> Result<(), Error> {
        let url = format!("{}/api/v0/ops/auth/role", endpoint.base_url());
        debug!(url = %url, pod = %endpoint.pod, username = %role.username, "Creating role");

        let superuser = role.superuser.to_string();
        let response = self
            .http
            .post(&url)
            .query(&[
                ("username", role.username.as_str()),
                ("password", role.password.as_str()),
                ("can_login", "true"),
                ("is_superuser", superuser.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::management_api(&endpoint.pod, format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::management_api(
                &endpoint.pod,
                format!("creating role {} returned {}: {}", role.username, status, body),
            ));
        }

        info!(
            pod = %endpoint.pod,
            username = %role.username,
            superuser = role.superuser,
            "Role created"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec, PodStatus};
    use kube::api::ObjectMeta;

    fn pod(ip: Option<&str>, containers: Vec<Container>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("cluster1-dc1-r1-sts-0".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers,
                ..Default::default()
            }),
            status: Some(PodStatus {
                pod_ip: ip.map(str::to_string),
                ..Default::default()
            }),
        }
    }

    fn container(name: &str, ports: &[(&str, i32)]) -> Container {
        Container {
            name: name.to_string(),
            ports: Some(
                ports
                    .iter()
                    .map(|(n, p)| ContainerPort {
                        name: Some(n.to_string()),
                        container_port: *p,
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_endpoint_uses_declared_port() {
        let pod = pod(
            Some("10.0.0.7"),
            vec![
                container("server-system-logger", &[("metrics", 9000)]),
                container(CASSANDRA_CONTAINER, &[("native", 9042), (MGMT_API_PORT_NAME, 8081)]),
            ],
        );

        let endpoint = NodeEndpoint::from_pod(&pod).unwrap();
        assert_eq!(endpoint.pod, "cluster1-dc1-r1-sts-0");
        assert_eq!(endpoint.base_url(), "http://10.0.0.7:8081");
    }

    #[test]
    fn test_endpoint_defaults_port() {
        let pod = pod(Some("10.0.0.7"), vec![container(CASSANDRA_CONTAINER, &[])]);
        assert_eq!(NodeEndpoint::from_pod(&pod).unwrap().port, DEFAULT_MGMT_API_PORT);
    }

    #[test]
    fn test_pod_without_ip_has_no_endpoint() {
        assert_eq!(NodeEndpoint::from_pod(&pod(None, vec![])), None);
        assert_eq!(NodeEndpoint::from_pod(&pod(Some(""), vec![])), None);
    }

    #[test]
    fn test_role_request_debug_hides_password() {
        let role = RoleRequest {
            username: "alice".to_string(),
            password: "s3cret".to_string(),
            superuser: false,
        };
        let out = format!("{:?}", role);
        assert!(out.contains("alice"));
        assert!(!out.contains("s3cret"));
    }
}
