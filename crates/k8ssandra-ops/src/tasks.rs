//! Maintenance tasks
//!
//! A rolling restart is requested by creating one CassandraTask with a single
//! `restart` job. The reconciler picks it up and sets `status.completionTime`
//! once done, which is the only completion signal observed here.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kube::ResourceExt;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::info;

use k8ssandra_common::crd::{
    CassandraCommand, CassandraDatacenter, CassandraJob, CassandraTask, CassandraTaskSpec,
    DatacenterReference, JobArguments,
};
use k8ssandra_common::kube_utils::{cancellable, poll_until, WaitConfig};
use k8ssandra_common::{Error, LABEL_CREATED_BY, LABEL_CREATED_BY_VALUE};

use crate::client::ControlPlane;
use crate::datacenter::DatacenterController;

/// Interval and timeout for waiting on task completion
pub const TASK_COMPLETION_WAIT: WaitConfig =
    WaitConfig::new(Duration::from_secs(5), Duration::from_secs(600));

/// Generate a task name unique per creation
///
/// `<datacenter>-<command>-<UTC timestamp>-<random hex>`; the timestamp
/// orders names and the suffix separates requests made within one second.
pub fn task_name(datacenter: &str, command: CassandraCommand) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x100_0000);
    format!(
        "{}-{}-{}-{:06x}",
        datacenter,
        command,
        Utc::now().format("%Y%m%d%H%M%S"),
        suffix
    )
}

/// Build a task running one command against a datacenter
///
/// An empty rack is the same as no rack: the command applies to all racks.
pub fn build_task(
    datacenter: &CassandraDatacenter,
    command: CassandraCommand,
    rack: Option<&str>,
) -> CassandraTask {
    let dc_name = datacenter.name_any();
    let namespace = datacenter.namespace().unwrap_or_default();

    let mut task = CassandraTask::new(
        &task_name(&dc_name, command),
        CassandraTaskSpec {
            datacenter: DatacenterReference {
                name: dc_name.clone(),
                namespace: namespace.clone(),
            },
            jobs: vec![CassandraJob {
                name: format!("{}-{}", dc_name, command),
                command,
                arguments: JobArguments {
                    rack_name: rack.filter(|r| !r.is_empty()).map(str::to_string),
                    ..Default::default()
                },
            }],
        },
    );
    task.metadata.namespace = Some(namespace);
    task.metadata.labels = Some(BTreeMap::from([(
        LABEL_CREATED_BY.to_string(),
        LABEL_CREATED_BY_VALUE.to_string(),
    )]));
    task
}

/// Creates maintenance tasks and tracks their completion
pub struct TaskOrchestrator {
    client: Arc<dyn ControlPlane>,
    datacenters: DatacenterController,
    wait: WaitConfig,
}

impl TaskOrchestrator {
    /// Create an orchestrator with the default wait settings
    pub fn new(client: Arc<dyn ControlPlane>) -> Self {
        Self {
            datacenters: DatacenterController::new(Arc::clone(&client)),
            client,
            wait: TASK_COMPLETION_WAIT,
        }
    }

    /// Override the completion wait settings
    pub fn with_wait(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }

    /// Request a rolling restart of a datacenter, or of one rack
    ///
    /// A stopped datacenter is rejected with `InvalidState` before any task
    /// is created. Returns the created task.
    pub async fn restart(
        &self,
        name: &str,
        namespace: &str,
        rack: Option<&str>,
        wait: bool,
        cancel: &CancellationToken,
    ) -> Result<CassandraTask, Error> {
        let dc = self.datacenters.get(name, namespace, cancel).await?;
        if dc.is_stopped() {
            return Err(Error::invalid_state(
                dc.reference(),
                "unable to do rolling restart to a stopped datacenter",
            ));
        }

        let task = build_task(&dc, CassandraCommand::Restart, rack);
        let task_name = task.name_any();
        let operation = format!("create CassandraTask {}/{}", namespace, task_name);
        let created = cancellable(cancel, &operation, self.client.create_task(&task)).await?;

        info!(
            datacenter = %name,
            namespace = %namespace,
            task = %task_name,
            rack = rack.unwrap_or("all"),
            "Created restart task"
        );

        if wait {
            self.wait_for_completion(&task_name, namespace, cancel)
                .await?;
            info!(task = %task_name, namespace = %namespace, "Task completed");
        }

        Ok(created)
    }

    /// Poll a freshly fetched task until it reports a completion time
    pub async fn wait_for_completion(
        &self,
        name: &str,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        poll_until(
            cancel,
            self.wait,
            format!("CassandraTask {}/{} to complete", namespace, name),
            || self.is_complete(name, namespace, cancel),
        )
        .await
    }

    async fn is_complete(
        &self,
        name: &str,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, Error> {
        let operation = format!("get CassandraTask {}/{}", namespace, name);
        let task = cancellable(cancel, &operation, self.client.get_task(name, namespace))
            .await?
            .ok_or_else(|| Error::not_found("CassandraTask", name, namespace))?;
        Ok(task.is_complete())
    }
}
