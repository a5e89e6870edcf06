//! Common types for k8ssandra lifecycle tooling: resources, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod leader_election;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label placed by cass-operator on every pod belonging to a datacenter
pub const DATACENTER_LABEL: &str = "cassandra.datastax.com/datacenter";

/// Label key identifying the tool that created a resource
pub const LABEL_CREATED_BY: &str = "app.kubernetes.io/created-by";

/// Label value for resources created by this tool
pub const LABEL_CREATED_BY_VALUE: &str = "k8ssandra-client";

/// Field manager used for writes issued by this tool
pub const FIELD_MANAGER: &str = "k8ssandra-client";
