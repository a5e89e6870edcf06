//! Datacenter stop/start
//!
//! Stopping or starting a datacenter is a single write of `spec.stopped`.
//! The reconciler does the actual work; this module only observes the
//! resulting conditions when asked to wait.

use std::sync::Arc;
use std::time::Duration;

use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use k8ssandra_common::crd::{
    CassandraDatacenter, ConditionStatus, CONDITION_READY, CONDITION_STOPPED,
};
use k8ssandra_common::kube_utils::{cancellable, poll_until, WaitConfig};
use k8ssandra_common::Error;

use crate::client::ControlPlane;

/// Interval and timeout for each condition awaited after a state change
pub const STATE_CHANGE_WAIT: WaitConfig =
    WaitConfig::new(Duration::from_secs(10), Duration::from_secs(600));

/// Conditions that must hold, in order, once the datacenter has converged
///
/// The Stopped flag flips before Ready settles, so both are required.
pub fn convergence_conditions(stop: bool) -> [(&'static str, ConditionStatus); 2] {
    if stop {
        [
            (CONDITION_STOPPED, ConditionStatus::True),
            (CONDITION_READY, ConditionStatus::False),
        ]
    } else {
        [
            (CONDITION_STOPPED, ConditionStatus::False),
            (CONDITION_READY, ConditionStatus::True),
        ]
    }
}

/// Drives the desired stopped/running state of datacenters
pub struct DatacenterController {
    client: Arc<dyn ControlPlane>,
    wait: WaitConfig,
}

impl DatacenterController {
    /// Create a controller with the default wait settings
    pub fn new(client: Arc<dyn ControlPlane>) -> Self {
        Self {
            client,
            wait: STATE_CHANGE_WAIT,
        }
    }

    /// Override the per-condition wait settings
    pub fn with_wait(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }

    /// Fetch a datacenter, `NotFound` if it does not exist
    pub async fn get(
        &self,
        name: &str,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<CassandraDatacenter, Error> {
        let operation = format!("get CassandraDatacenter {}/{}", namespace, name);
        cancellable(cancel, &operation, self.client.get_datacenter(name, namespace))
            .await?
            .ok_or_else(|| Error::not_found("CassandraDatacenter", name, namespace))
    }

    /// Request the datacenter to stop
    pub async fn stop(
        &self,
        name: &str,
        namespace: &str,
        wait: bool,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.set_stopped_state(name, namespace, true, wait, cancel)
            .await
    }

    /// Request the datacenter to run; issued even if it is already running
    pub async fn start(
        &self,
        name: &str,
        namespace: &str,
        wait: bool,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.set_stopped_state(name, namespace, false, wait, cancel)
            .await
    }

    /// Write `spec.stopped = stop` and optionally wait for convergence
    ///
    /// The write is issued even when the value is unchanged, so a call that
    /// was interrupted while waiting can simply be repeated. A concurrent
    /// update surfaces as `Error::Conflict` and is not retried.
    pub async fn set_stopped_state(
        &self,
        name: &str,
        namespace: &str,
        stop: bool,
        wait: bool,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let mut dc = self.get(name, namespace, cancel).await?;
        let previous = dc.spec.stopped;
        dc.spec.stopped = stop;

        let operation = format!("update {}", dc.reference());
        cancellable(cancel, &operation, self.client.replace_datacenter(&dc)).await?;

        info!(
            datacenter = %dc.name_any(),
            namespace = %namespace,
            previous,
            stopped = stop,
            "Requested datacenter state change"
        );

        if !wait {
            return Ok(());
        }

        for (condition, status) in convergence_conditions(stop) {
            self.await_condition(name, namespace, condition, status, cancel)
                .await?;
        }

        info!(datacenter = %name, namespace = %namespace, stopped = stop, "Datacenter converged");
        Ok(())
    }

    /// Poll a freshly fetched datacenter until `condition == status`
    ///
    /// A missing condition counts as not yet satisfied.
    pub async fn await_condition(
        &self,
        name: &str,
        namespace: &str,
        condition: &str,
        status: ConditionStatus,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        debug!(
            datacenter = %name,
            condition = %condition,
            status = %status,
            "Waiting for condition"
        );
        poll_until(
            cancel,
            self.wait,
            format!(
                "CassandraDatacenter {}/{} condition {}={}",
                namespace, name, condition, status
            ),
            || self.condition_met(name, namespace, condition, status, cancel),
        )
        .await
    }

    async fn condition_met(
        &self,
        name: &str,
        namespace: &str,
        condition: &str,
        status: ConditionStatus,
        cancel: &CancellationToken,
    ) -> Result<bool, Error> {
        let dc = self.get(name, namespace, cancel).await?;
        Ok(dc.has_condition_status(condition, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::client::MockControlPlane;

    const FAST_WAIT: WaitConfig = WaitConfig::new(Duration::from_secs(10), Duration::from_secs(60));

    fn dc(stopped: bool, conditions: &[(&str, ConditionStatus)]) -> CassandraDatacenter {
        let mut dc = CassandraDatacenter::with_identity("dc1", "cass", stopped);
        dc.metadata.resource_version = Some("7".to_string());
        for (condition, status) in conditions {
            dc.set_condition(condition, *status);
        }
        dc
    }

    fn controller(mock: MockControlPlane) -> DatacenterController {
        DatacenterController::new(Arc::new(mock)).with_wait(FAST_WAIT)
    }

    mod state_changes {
        use super::*;

        #[tokio::test]
        async fn test_missing_datacenter_is_not_found() {
            let mut mock = MockControlPlane::new();
            mock.expect_get_datacenter().returning(|_, _| Ok(None));
            mock.expect_replace_datacenter().never();

            let err = controller(mock)
                .stop("dc1", "cass", false, &CancellationToken::new())
                .await
                .unwrap_err();

            assert!(err.is_not_found());
            assert_eq!(err.to_string(), "CassandraDatacenter cass/dc1 not found");
        }

        #[tokio::test]
        async fn test_stop_writes_stopped_and_keeps_resource_version() {
            let mut mock = MockControlPlane::new();
            mock.expect_get_datacenter()
                .withf(|name, namespace| name == "dc1" && namespace == "cass")
                .returning(|_, _| Ok(Some(dc(false, &[]))));
            mock.expect_replace_datacenter()
                .withf(|dc| {
                    dc.spec.stopped && dc.metadata.resource_version.as_deref() == Some("7")
                })
                .times(1)
                .returning(|dc| Ok(dc.clone()));

            controller(mock)
                .stop("dc1", "cass", false, &CancellationToken::new())
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn story_repeating_the_same_request_still_writes() {
            let stored = Arc::new(Mutex::new(dc(false, &[])));
            let writes = Arc::new(AtomicUsize::new(0));

            let mut mock = MockControlPlane::new();
            let read = Arc::clone(&stored);
            mock.expect_get_datacenter()
                .returning(move |_, _| Ok(Some(read.lock().unwrap().clone())));
            let write = Arc::clone(&stored);
            let count = Arc::clone(&writes);
            mock.expect_replace_datacenter().returning(move |dc| {
                count.fetch_add(1, Ordering::SeqCst);
                *write.lock().unwrap() = dc.clone();
                Ok(dc.clone())
            });

            let controller = controller(mock);
            let cancel = CancellationToken::new();
            controller.stop("dc1", "cass", false, &cancel).await.unwrap();
            controller.stop("dc1", "cass", false, &cancel).await.unwrap();

            assert_eq!(writes.load(Ordering::SeqCst), 2);
            assert!(stored.lock().unwrap().spec.stopped);
        }

        #[tokio::test]
        async fn test_conflict_is_surfaced_without_retry() {
            let mut mock = MockControlPlane::new();
            mock.expect_get_datacenter()
                .times(1)
                .returning(|_, _| Ok(Some(dc(false, &[]))));
            mock.expect_replace_datacenter().times(1).returning(|_| {
                Err(Error::Conflict {
                    kind: "CassandraDatacenter".to_string(),
                    name: "dc1".to_string(),
                    namespace: "cass".to_string(),
                    message: "the object has been modified".to_string(),
                })
            });

            let err = controller(mock)
                .stop("dc1", "cass", true, &CancellationToken::new())
                .await
                .unwrap_err();
            assert!(err.is_conflict());
        }

        #[tokio::test]
        async fn test_start_clears_stopped_even_when_running() {
            let mut mock = MockControlPlane::new();
            mock.expect_get_datacenter()
                .returning(|_, _| Ok(Some(dc(false, &[]))));
            mock.expect_replace_datacenter()
                .withf(|dc| !dc.spec.stopped)
                .times(1)
                .returning(|dc| Ok(dc.clone()));

            controller(mock)
                .start("dc1", "cass", false, &CancellationToken::new())
                .await
                .unwrap();
        }
    }

    mod convergence {
        use super::*;

        #[test]
        fn test_condition_order() {
            assert_eq!(
                convergence_conditions(true),
                [
                    (CONDITION_STOPPED, ConditionStatus::True),
                    (CONDITION_READY, ConditionStatus::False)
                ]
            );
            assert_eq!(
                convergence_conditions(false),
                [
                    (CONDITION_STOPPED, ConditionStatus::False),
                    (CONDITION_READY, ConditionStatus::True)
                ]
            );
        }

        /// Serves a scripted sequence of observed states, one per fetch after the write
        fn scripted(states: Vec<CassandraDatacenter>) -> (MockControlPlane, Arc<AtomicUsize>) {
            let fetches = Arc::new(AtomicUsize::new(0));
            let mut mock = MockControlPlane::new();

            let count = Arc::clone(&fetches);
            mock.expect_get_datacenter().returning(move |_, _| {
                let n = count.fetch_add(1, Ordering::SeqCst);
                let idx = n.min(states.len() - 1);
                Ok(Some(states[idx].clone()))
            });
            mock.expect_replace_datacenter()
                .times(1)
                .returning(|dc| Ok(dc.clone()));
            (mock, fetches)
        }

        #[tokio::test(start_paused = true)]
        async fn story_stop_waits_for_stopped_then_not_ready() {
            let running = dc(false, &[(CONDITION_READY, ConditionStatus::True)]);
            let (mock, fetches) = scripted(vec![
                // initial read before the write
                running.clone(),
                // Stopped poll: not yet, not yet, flipped
                dc(true, &[(CONDITION_READY, ConditionStatus::True)]),
                dc(true, &[(CONDITION_READY, ConditionStatus::True)]),
                dc(
                    true,
                    &[
                        (CONDITION_STOPPED, ConditionStatus::True),
                        (CONDITION_READY, ConditionStatus::True),
                    ],
                ),
                // Ready poll: still ready once, then settled
                dc(
                    true,
                    &[
                        (CONDITION_STOPPED, ConditionStatus::True),
                        (CONDITION_READY, ConditionStatus::True),
                    ],
                ),
                dc(
                    true,
                    &[
                        (CONDITION_STOPPED, ConditionStatus::True),
                        (CONDITION_READY, ConditionStatus::False),
                    ],
                ),
            ]);

            let start = tokio::time::Instant::now();
            controller(mock)
                .stop("dc1", "cass", true, &CancellationToken::new())
                .await
                .unwrap();

            // 1 initial read + 3 polls for Stopped + 2 polls for Ready
            assert_eq!(fetches.load(Ordering::SeqCst), 6);
            // 2 sleeps in the first wait, 1 in the second
            assert_eq!(start.elapsed(), Duration::from_secs(30));
        }

        #[tokio::test(start_paused = true)]
        async fn story_start_waits_for_ready() {
            let (mock, fetches) = scripted(vec![
                dc(true, &[(CONDITION_STOPPED, ConditionStatus::True)]),
                dc(
                    false,
                    &[
                        (CONDITION_STOPPED, ConditionStatus::False),
                        (CONDITION_READY, ConditionStatus::False),
                    ],
                ),
                dc(
                    false,
                    &[
                        (CONDITION_STOPPED, ConditionStatus::False),
                        (CONDITION_READY, ConditionStatus::True),
                    ],
                ),
            ]);

            controller(mock)
                .start("dc1", "cass", true, &CancellationToken::new())
                .await
                .unwrap();

            // initial read, then one poll per condition
            assert_eq!(fetches.load(Ordering::SeqCst), 3);
        }

        #[tokio::test(start_paused = true)]
        async fn story_stuck_datacenter_times_out() {
            let (mock, _) = scripted(vec![dc(false, &[(CONDITION_READY, ConditionStatus::True)])]);

            let err = controller(mock)
                .stop("dc1", "cass", true, &CancellationToken::new())
                .await
                .unwrap_err();

            assert!(err.is_deadline_exceeded());
            assert!(err.to_string().contains("Stopped=True"));
        }

        #[tokio::test(start_paused = true)]
        async fn test_datacenter_deleted_while_waiting_is_not_found() {
            let fetches = Arc::new(AtomicUsize::new(0));
            let mut mock = MockControlPlane::new();
            let count = Arc::clone(&fetches);
            mock.expect_get_datacenter().returning(move |_, _| {
                if count.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(Some(dc(false, &[])))
                } else {
                    Ok(None)
                }
            });
            mock.expect_replace_datacenter().returning(|dc| Ok(dc.clone()));

            let err = controller(mock)
                .stop("dc1", "cass", true, &CancellationToken::new())
                .await
                .unwrap_err();
            assert!(err.is_not_found());
            assert_eq!(fetches.load(Ordering::SeqCst), 2);
        }

        #[tokio::test(start_paused = true)]
        async fn test_cancellation_interrupts_wait() {
            let (mock, _) = scripted(vec![dc(false, &[])]);
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(25)).await;
                trigger.cancel();
            });

            let err = controller(mock)
                .stop("dc1", "cass", true, &cancel)
                .await
                .unwrap_err();
            assert!(err.is_cancelled());
        }
    }
}
