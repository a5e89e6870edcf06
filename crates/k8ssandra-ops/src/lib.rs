//! Lifecycle operations for k8ssandra datacenters
//!
//! - [`datacenter::DatacenterController`] stops and starts a datacenter and
//!   waits for its conditions to converge
//! - [`tasks::TaskOrchestrator`] requests rolling restarts as CassandraTasks
//!   and waits for completion
//! - [`pods::PodLocator`] resolves the member pods of a datacenter
//! - [`users::UserProvisioner`] creates database roles through a member's
//!   management endpoint
//! - [`secrets`] reads credentials from disk and mounts Secrets locally
//!
//! All Kubernetes access goes through [`client::ControlPlane`].

#![deny(missing_docs)]

pub mod client;
pub mod datacenter;
pub mod mgmtapi;
pub mod pods;
pub mod secrets;
pub mod tasks;
pub mod users;

pub use client::{ControlPlane, KubeControlPlane};
pub use datacenter::DatacenterController;
pub use pods::PodLocator;
pub use tasks::TaskOrchestrator;
pub use users::UserProvisioner;
