//! CassandraDatacenter resource
//!
//! Owned by cass-operator. Only `spec.stopped` and `status.conditions` are
//! modeled; every other field is carried through `extra` so a
//! read-modify-write of `spec.stopped` never drops fields we don't know.

use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{condition_status, set_condition, Condition, ConditionStatus};

/// Condition reported once every member has started and joined
pub const CONDITION_READY: &str = "Ready";

/// Condition reported once the datacenter has scaled to zero on request
pub const CONDITION_STOPPED: &str = "Stopped";

/// Desired state of a CassandraDatacenter
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cassandra.datastax.com",
    version = "v1beta1",
    kind = "CassandraDatacenter",
    plural = "cassandradatacenters",
    shortname = "cassdc",
    namespaced,
    status = "CassandraDatacenterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct CassandraDatacenterSpec {
    /// Request the reconciler to scale the datacenter down to zero pods
    #[serde(default)]
    pub stopped: bool,

    /// Fields not modeled here, preserved verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Observed state of a CassandraDatacenter
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CassandraDatacenterStatus {
    /// Conditions keyed by type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Fields not modeled here, preserved verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl CassandraDatacenter {
    /// Build a datacenter with the given identity and desired stopped state
    pub fn with_identity(name: &str, namespace: &str, stopped: bool) -> Self {
        let mut dc = CassandraDatacenter::new(
            name,
            CassandraDatacenterSpec {
                stopped,
                ..Default::default()
            },
        );
        dc.metadata.namespace = Some(namespace.to_string());
        dc
    }

    /// Human-readable `Kind namespace/name` reference for messages
    pub fn reference(&self) -> String {
        format!(
            "CassandraDatacenter {}/{}",
            self.namespace().unwrap_or_default(),
            self.name_any()
        )
    }

    /// Whether the datacenter is requested to be stopped
    pub fn is_stopped(&self) -> bool {
        self.spec.stopped
    }

    /// Status of the named condition, `None` if not reported yet
    pub fn condition_status(&self, condition_type: &str) -> Option<ConditionStatus> {
        self.status
            .as_ref()
            .and_then(|s| condition_status(&s.conditions, condition_type))
    }

    /// Whether the named condition currently has the wanted status
    pub fn has_condition_status(&self, condition_type: &str, wanted: ConditionStatus) -> bool {
        self.condition_status(condition_type) == Some(wanted)
    }

    /// Insert or replace a status condition
    pub fn set_condition(&mut self, condition_type: &str, status: ConditionStatus) {
        let st = self.status.get_or_insert_with(Default::default);
        set_condition(&mut st.conditions, Condition::new(condition_type, status));
    }
}
