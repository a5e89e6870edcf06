//! `start`, `stop` and `restart` for a datacenter

use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use k8ssandra_common::leader_election::{HolderIdentity, KubeLeaseStore, LeaseGate, LeaseGuard};
use k8ssandra_ops::datacenter::STATE_CHANGE_WAIT;
use k8ssandra_ops::tasks::TASK_COMPLETION_WAIT;
use k8ssandra_ops::{ControlPlane, DatacenterController, KubeControlPlane, TaskOrchestrator};

use crate::config::{local_hostname, KubeArgs};
use crate::{Error, Result};

/// Arguments shared by start, stop and restart
#[derive(Args, Debug, Clone, Default)]
pub struct OperateArgs {
    /// Target CassandraDatacenter
    pub datacenter: Option<String>,

    /// Block until the datacenter reports the requested state
    #[arg(short = 'w', long)]
    pub wait: bool,

    /// Maximum seconds to wait for each state transition when --wait is set
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    #[command(flatten)]
    pub lock: LockArgs,
}

/// Arguments of `restart`
#[derive(Args, Debug, Clone, Default)]
pub struct RestartArgs {
    #[command(flatten)]
    pub target: OperateArgs,

    /// Restart only the named rack
    #[arg(long)]
    pub rack: Option<String>,
}

/// Optional lease serializing concurrent invocations
#[derive(Args, Debug, Clone, Default)]
pub struct LockArgs {
    /// Run only while holding this lease
    #[arg(long, value_name = "NAME")]
    pub lock: Option<String>,

    /// Namespace of the lease (defaults to the target namespace)
    #[arg(long, value_name = "NAMESPACE", requires = "lock")]
    pub lock_namespace: Option<String>,
}

/// What to do with the datacenter
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Clear `spec.stopped`
    Start,
    /// Set `spec.stopped`
    Stop,
    /// Create a restart task
    Restart {
        /// Rack to restart; all racks when absent
        rack: Option<String>,
    },
}

/// Validated invocation
#[derive(Debug)]
struct Plan {
    datacenter: String,
    action: Action,
    wait: bool,
    timeout: Option<Duration>,
    lock: Option<String>,
    lock_namespace: Option<String>,
}

impl Plan {
    fn new(args: OperateArgs, action: Action) -> Result<Self> {
        let datacenter = args
            .datacenter
            .filter(|dc| !dc.is_empty())
            .ok_or_else(|| Error::validation("no target datacenter given"))?;

        if args.timeout == Some(0) {
            return Err(Error::validation("--timeout must be greater than zero"));
        }

        Ok(Self {
            datacenter,
            action,
            wait: args.wait,
            timeout: args.timeout.map(Duration::from_secs),
            lock: args.lock.lock.filter(|l| !l.is_empty()),
            lock_namespace: args.lock.lock_namespace,
        })
    }
}

/// Run `start`
pub async fn start(args: OperateArgs, kube: &KubeArgs, cancel: CancellationToken) -> Result<()> {
    run(Plan::new(args, Action::Start)?, kube, cancel).await
}

/// Run `stop`
pub async fn stop(args: OperateArgs, kube: &KubeArgs, cancel: CancellationToken) -> Result<()> {
    run(Plan::new(args, Action::Stop)?, kube, cancel).await
}

/// Run `restart`
pub async fn restart(args: RestartArgs, kube: &KubeArgs, cancel: CancellationToken) -> Result<()> {
    let action = Action::Restart {
        rack: args.rack.filter(|r| !r.is_empty()),
    };
    run(Plan::new(args.target, action)?, kube, cancel).await
}

async fn run(plan: Plan, kube: &KubeArgs, cancel: CancellationToken) -> Result<()> {
    let session = kube.connect().await?;
    let control_plane: Arc<dyn ControlPlane> =
        Arc::new(KubeControlPlane::new(session.client.clone()));

    let guard = match &plan.lock {
        Some(lock) => {
            let lock_namespace = plan
                .lock_namespace
                .clone()
                .unwrap_or_else(|| session.namespace.clone());
            let gate = LeaseGate::new(
                Arc::new(KubeLeaseStore::new(session.client.clone())),
                HolderIdentity::for_host(&local_hostname()),
            );
            Some(gate.acquire(&lock_namespace, lock, &cancel).await?)
        }
        None => None,
    };

    let token = guard
        .as_ref()
        .map(LeaseGuard::cancellation)
        .unwrap_or_else(|| cancel.clone());

    let outcome = execute(control_plane, &plan, &session.namespace, &token).await;

    let outcome = match guard {
        Some(guard) => {
            let outcome = outcome.map_err(|e| guard.explain(e));
            guard.release().await;
            outcome
        }
        None => outcome,
    };

    println!("{}", outcome?);
    Ok(())
}

async fn execute(
    control_plane: Arc<dyn ControlPlane>,
    plan: &Plan,
    namespace: &str,
    cancel: &CancellationToken,
) -> std::result::Result<String, k8ssandra_common::Error> {
    let dc = plan.datacenter.as_str();
    info!(
        datacenter = %dc,
        namespace = %namespace,
        action = ?plan.action,
        wait = plan.wait,
        "Running"
    );

    match &plan.action {
        Action::Start | Action::Stop => {
            let stop = plan.action == Action::Stop;
            let mut controller = DatacenterController::new(control_plane);
            if let Some(timeout) = plan.timeout {
                controller = controller.with_wait(STATE_CHANGE_WAIT.with_timeout(timeout));
            }
            controller
                .set_stopped_state(dc, namespace, stop, plan.wait, cancel)
                .await?;

            Ok(match (stop, plan.wait) {
                (true, true) => format!("Datacenter {} stopped", dc),
                (true, false) => format!("Stop requested for datacenter {}", dc),
                (false, true) => format!("Datacenter {} started", dc),
                (false, false) => format!("Start requested for datacenter {}", dc),
            })
        }
        Action::Restart { rack } => {
            let mut orchestrator = TaskOrchestrator::new(control_plane);
            if let Some(timeout) = plan.timeout {
                orchestrator = orchestrator.with_wait(TASK_COMPLETION_WAIT.with_timeout(timeout));
            }
            let task = orchestrator
                .restart(dc, namespace, rack.as_deref(), plan.wait, cancel)
                .await?;

            let scope = rack
                .as_deref()
                .map(|r| format!("rack {} of datacenter {}", r, dc))
                .unwrap_or_else(|| format!("datacenter {}", dc));
            Ok(if plan.wait {
                format!("Rolling restart of {} completed (task {})", scope, task.name_any())
            } else {
                format!("Rolling restart of {} requested (task {})", scope, task.name_any())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(dc: Option<&str>) -> OperateArgs {
        OperateArgs {
            datacenter: dc.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_datacenter_is_rejected() {
        for dc in [None, Some("")] {
            let err = Plan::new(args(dc), Action::Stop).unwrap_err();
            assert_eq!(err.to_string(), "no target datacenter given");
        }
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let mut a = args(Some("dc1"));
        a.timeout = Some(0);
        assert!(matches!(
            Plan::new(a, Action::Start),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn test_plan_carries_options() {
        let mut a = args(Some("dc1"));
        a.wait = true;
        a.timeout = Some(120);
        a.lock = LockArgs {
            lock: Some("dc1-ops".to_string()),
            lock_namespace: Some("ops".to_string()),
        };

        let plan = Plan::new(a, Action::Restart { rack: Some("r1".to_string()) }).unwrap();
        assert_eq!(plan.datacenter, "dc1");
        assert!(plan.wait);
        assert_eq!(plan.timeout, Some(Duration::from_secs(120)));
        assert_eq!(plan.lock.as_deref(), Some("dc1-ops"));
        assert_eq!(plan.lock_namespace.as_deref(), Some("ops"));
    }

    #[test]
    fn test_empty_lock_name_means_no_lock() {
        let mut a = args(Some("dc1"));
        a.lock.lock = Some(String::new());
        assert_eq!(Plan::new(a, Action::Start).unwrap().lock, None);
    }
}
