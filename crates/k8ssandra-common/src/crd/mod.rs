//! Resources consumed from the k8ssandra control plane
//!
//! These types mirror the parts of the upstream schemas this tool reads or
//! writes. The schemas are owned upstream; field names are the wire contract.

mod datacenter;
mod task;
mod types;

pub use datacenter::{
    CassandraDatacenter, CassandraDatacenterSpec, CassandraDatacenterStatus, CONDITION_READY,
    CONDITION_STOPPED,
};
pub use task::{
    CassandraCommand, CassandraJob, CassandraTask, CassandraTaskSpec, CassandraTaskStatus,
    DatacenterReference, JobArguments,
};
pub use types::{condition_status, set_condition, Condition, ConditionStatus};
