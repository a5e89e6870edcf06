//! CassandraTask resource
//!
//! A one-shot maintenance request consumed by cass-operator. Created here,
//! never updated or deleted here.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Maintenance command understood by the task reconciler
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CassandraCommand {
    /// Remove data no longer owned by the node
    Cleanup,
    /// Rebuild data from another datacenter
    Rebuild,
    /// Rolling restart
    Restart,
    /// Rewrite sstables to the current format
    #[serde(rename = "upgradesstables")]
    UpgradeSsTables,
    /// Replace a node
    #[serde(rename = "replacenode")]
    ReplaceNode,
    /// Force a compaction
    Compaction,
    /// Scrub sstables
    Scrub,
    /// Move a node to a new token
    Move,
    /// Remove deleted data
    #[serde(rename = "garbagecollect")]
    GarbageCollect,
    /// Flush memtables
    Flush,
    /// Load newly placed sstables
    Refresh,
}

impl CassandraCommand {
    /// Wire value of the command
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cleanup => "cleanup",
            Self::Rebuild => "rebuild",
            Self::Restart => "restart",
            Self::UpgradeSsTables => "upgradesstables",
            Self::ReplaceNode => "replacenode",
            Self::Compaction => "compaction",
            Self::Scrub => "scrub",
            Self::Move => "move",
            Self::GarbageCollect => "garbagecollect",
            Self::Flush => "flush",
            Self::Refresh => "refresh",
        }
    }
}

impl std::fmt::Display for CassandraCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to the datacenter a task runs against
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct DatacenterReference {
    /// Datacenter name
    pub name: String,
    /// Datacenter namespace
    pub namespace: String,
}

/// Command arguments
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct JobArguments {
    /// Restrict the job to one rack; absent means all racks
    #[serde(rename = "rack", default, skip_serializing_if = "Option::is_none")]
    pub rack_name: Option<String>,

    /// Arguments of other commands, preserved verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl JobArguments {
    fn is_empty(&self) -> bool {
        self.rack_name.is_none() && self.extra.is_empty()
    }
}

/// A single job within a task
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct CassandraJob {
    /// Job name
    pub name: String,
    /// Command to execute
    pub command: CassandraCommand,
    /// Command arguments
    #[serde(rename = "args", default, skip_serializing_if = "JobArguments::is_empty")]
    pub arguments: JobArguments,
}

/// Maintenance task against one datacenter
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "control.k8ssandra.io",
    version = "v1alpha1",
    kind = "CassandraTask",
    plural = "cassandratasks",
    namespaced,
    status = "CassandraTaskStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct CassandraTaskSpec {
    /// Target datacenter
    pub datacenter: DatacenterReference,

    /// Jobs to run, in order
    #[serde(default)]
    pub jobs: Vec<CassandraJob>,
}

/// Observed task progress
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CassandraTaskStatus {
    /// When the reconciler started the task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    /// Set once the task finished; never cleared afterwards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,

    /// Fields not modeled here, preserved verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl CassandraTask {
    /// Whether the reconciler reported completion
    pub fn is_complete(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.completion_time.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn restart_task(rack: Option<&str>) -> CassandraTask {
        let mut task = CassandraTask::new(
            "dc1-restart-x",
            CassandraTaskSpec {
                datacenter: DatacenterReference {
                    name: "dc1".to_string(),
                    namespace: "cass".to_string(),
                },
                jobs: vec![CassandraJob {
                    name: "dc1-restart".to_string(),
                    command: CassandraCommand::Restart,
                    arguments: JobArguments {
                        rack_name: rack.map(str::to_string),
                        ..Default::default()
                    },
                }],
            },
        );
        task.metadata.namespace = Some("cass".to_string());
        task
    }

    #[test]
    fn test_restart_task_wire_format() {
        let value = serde_json::to_value(restart_task(Some("r1"))).unwrap();
        assert_eq!(value["apiVersion"], json!("control.k8ssandra.io/v1alpha1"));
        assert_eq!(value["kind"], json!("CassandraTask"));
        assert_eq!(
            value["spec"]["datacenter"],
            json!({"name": "dc1", "namespace": "cass"})
        );
        assert_eq!(value["spec"]["jobs"][0]["command"], json!("restart"));
        assert_eq!(value["spec"]["jobs"][0]["args"]["rack"], json!("r1"));
    }

    #[test]
    fn test_all_racks_omits_arguments() {
        let value = serde_json::to_value(restart_task(None)).unwrap();
        assert!(value["spec"]["jobs"][0].get("args").is_none());
    }

    #[test]
    fn test_command_wire_values() {
        for cmd in [
            CassandraCommand::Restart,
            CassandraCommand::UpgradeSsTables,
            CassandraCommand::ReplaceNode,
            CassandraCommand::GarbageCollect,
        ] {
            assert_eq!(serde_json::to_value(cmd).unwrap(), json!(cmd.as_str()));
        }
    }

    #[test]
    fn test_completion_is_read_from_status() {
        let mut task = restart_task(None);
        assert!(!task.is_complete());

        task.status = Some(
            serde_json::from_value(json!({
                "startTime": "2024-01-01T00:00:00Z",
                "active": 1
            }))
            .unwrap(),
        );
        assert!(!task.is_complete());

        task.status = Some(
            serde_json::from_value(json!({
                "startTime": "2024-01-01T00:00:00Z",
                "completionTime": "2024-01-01T00:05:00Z",
                "succeeded": 3
            }))
            .unwrap(),
        );
        assert!(task.is_complete());
    }
}
