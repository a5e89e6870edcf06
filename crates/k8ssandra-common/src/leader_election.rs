//! Mutual exclusion using Kubernetes Leases
//!
//! Serializes lifecycle operations across processes through a
//! coordination.k8s.io/v1 Lease scoped per `(namespace, lock name)`. Two
//! different lock names never contend.
//!
//! # Atomicity
//!
//! Uses resourceVersion for compare-and-swap semantics. If the lease changes
//! between read and write, the write fails with 409 Conflict and the attempt
//! counts as "not acquired". Two processes can never both believe they hold
//! the lease.
//!
//! # Losing the lease
//!
//! The holder renews every retry period. If the lease is taken by someone
//! else, or no renewal succeeds within the renew deadline, the guard's
//! cancellation token fires. Operations run under a lease must thread that
//! token so in-flight work stops making mutating calls.
//!
//! # Release
//!
//! Cancelling the caller's token, calling [`LeaseGuard::release`], or
//! dropping the guard clears the holder so a follower can take over
//! immediately instead of waiting for the lease to expire. A release only
//! clears the acquisition it belongs to, identified by the lease's
//! `acquireTime`. The next caller in the same process is admitted only
//! after the release has been written.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::kube_utils::cancellable;
use crate::Error;

// Timing constants
const LEASE_DURATION: Duration = Duration::from_secs(10);
const RENEW_DEADLINE: Duration = Duration::from_secs(5);
const RETRY_PERIOD: Duration = Duration::from_secs(2);

/// Lease timing
///
/// `retry_period < renew_deadline < lease_duration`: a holder that cannot
/// renew gives up before its lease can expire under it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct LeaseConfig {
    /// How long a lease is valid after its last renewal
    lease_duration: Duration,
    /// How long the holder keeps trying to renew before declaring loss
    renew_deadline: Duration,
    /// Interval between acquisition attempts and renewals
    retry_period: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            lease_duration: LEASE_DURATION,
            renew_deadline: RENEW_DEADLINE,
            retry_period: RETRY_PERIOD,
        }
    }
}

/// Identity recorded as the lease holder
///
/// Built once per process and passed in explicitly. The random suffix keeps
/// two processes on the same host apart.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HolderIdentity(String);

impl HolderIdentity {
    /// Use an exact identity string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate `<host>_<uuid>`
    pub fn for_host(host: &str) -> Self {
        Self(format!("{}_{}", host, uuid::Uuid::new_v4()))
    }

    /// The identity string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for HolderIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage for Lease objects
///
/// `create` and `replace` return `Ok(false)` when they lose a
/// compare-and-swap race; any other failure is an error.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Fetch a lease, `None` if it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Lease>, Error>;

    /// Create a lease; `false` if it already exists
    async fn create(&self, lease: &Lease) -> Result<bool, Error>;

    /// Replace a lease guarded by its resourceVersion; `false` on conflict
    async fn replace(&self, lease: &Lease) -> Result<bool, Error>;
}

/// Lease storage backed by the Kubernetes API
pub struct KubeLeaseStore {
    client: Client,
}

impl KubeLeaseStore {
    /// Create a store using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Lease> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn lease_key(lease: &Lease) -> (&str, &str) {
    (
        lease.metadata.namespace.as_deref().unwrap_or_default(),
        lease.metadata.name.as_deref().unwrap_or_default(),
    )
}

#[async_trait]
impl LeaseStore for KubeLeaseStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Lease>, Error> {
        match self.api(namespace).get(name).await {
            Ok(lease) => Ok(Some(lease)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create(&self, lease: &Lease) -> Result<bool, Error> {
        let (namespace, _) = lease_key(lease);
        match self.api(namespace).create(&PostParams::default(), lease).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn replace(&self, lease: &Lease) -> Result<bool, Error> {
        let (namespace, name) = lease_key(lease);
        match self
            .api(namespace)
            .replace(name, &PostParams::default(), lease)
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// One contender for one lease
struct Election {
    store: Arc<dyn LeaseStore>,
    namespace: String,
    lock: String,
    identity: HolderIdentity,
    config: LeaseConfig,
}

impl Election {
    /// Try to acquire or renew the lease atomically
    ///
    /// `held` is the acquire time of the acquisition being renewed, `None`
    /// when acquiring. Returns the acquire time now recorded in the lease,
    /// or `None` if the lease is not ours.
    ///
    /// Uses resourceVersion for compare-and-swap semantics:
    /// - Read lease and its resourceVersion
    /// - Decide if we can acquire/renew
    /// - Write with resourceVersion - fails if lease changed since read
    async fn try_acquire_or_renew(
        &self,
        held: Option<&MicroTime>,
    ) -> Result<Option<MicroTime>, Error> {
        // MicroTime is serialized with microsecond precision
        let now = Utc::now().trunc_subsecs(6);

        let Some(lease) = self.store.get(&self.namespace, &self.lock).await? else {
            return self.create_lease(now).await;
        };

        let spec = lease.spec.as_ref();
        let holder = spec
            .and_then(|s| s.holder_identity.as_deref())
            .filter(|h| !h.is_empty());

        if holder == Some(self.identity.as_str()) {
            let acquired = spec.and_then(|s| s.acquire_time.as_ref());
            return match held {
                Some(held) if acquired == Some(held) => self.write_lease(&lease, now, false).await,
                Some(_) => {
                    debug!(identity = %self.identity, "Lease acquired again under our identity");
                    Ok(None)
                }
                // Left behind by an earlier acquisition that failed to release
                None => self.write_lease(&lease, now, true).await,
            };
        }

        let renew_time = spec.and_then(|s| s.renew_time.as_ref());
        let duration_secs = spec.and_then(|s| s.lease_duration_seconds);
        let is_expired = match (renew_time, duration_secs) {
            (Some(rt), Some(duration)) => now > rt.0 + chrono::Duration::seconds(duration as i64),
            _ => true,
        };

        if holder.is_none() || is_expired {
            self.write_lease(&lease, now, true).await
        } else {
            debug!(
                identity = %self.identity,
                holder = holder.unwrap_or_default(),
                "Lease held by another"
            );
            Ok(None)
        }
    }

    fn spec(
        &self,
        now: chrono::DateTime<Utc>,
        acquire_time: Option<MicroTime>,
        transitions: i32,
    ) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(self.identity.to_string()),
            lease_duration_seconds: Some(self.config.lease_duration.as_secs() as i32),
            acquire_time: acquire_time.or(Some(MicroTime(now))),
            renew_time: Some(MicroTime(now)),
            lease_transitions: Some(transitions),
            ..Default::default()
        }
    }

    /// Create a new lease (first holder)
    async fn create_lease(&self, now: chrono::DateTime<Utc>) -> Result<Option<MicroTime>, Error> {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.lock.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(self.spec(now, None, 0)),
        };

        if self.store.create(&lease).await? {
            info!(identity = %self.identity, lease = %self.lock, "Created new lease");
            Ok(Some(MicroTime(now)))
        } else {
            debug!(identity = %self.identity, "Lease creation conflict, will retry");
            Ok(None)
        }
    }

    /// Renew our lease or take over a free one (atomic with resourceVersion)
    async fn write_lease(
        &self,
        existing: &Lease,
        now: chrono::DateTime<Utc>,
        take_over: bool,
    ) -> Result<Option<MicroTime>, Error> {
        let existing_spec = existing.spec.as_ref();
        let transitions = existing_spec
            .and_then(|s| s.lease_transitions)
            .unwrap_or(0);

        let spec = if take_over {
            self.spec(now, None, transitions + 1)
        } else {
            let acquired = existing_spec.and_then(|s| s.acquire_time.clone());
            self.spec(now, acquired, transitions)
        };

        let acquired = spec.acquire_time.clone();
        let mut updated = existing.clone();
        updated.spec = Some(spec);

        let written = self.store.replace(&updated).await?;
        match (written, take_over) {
            (true, true) => info!(
                identity = %self.identity,
                transitions = transitions + 1,
                "Took over lease"
            ),
            (true, false) => debug!(identity = %self.identity, "Lease renewed"),
            (false, _) => debug!(identity = %self.identity, "Lease write conflict"),
        }
        Ok(if written { acquired } else { None })
    }

    /// Clear the holder so another contender can acquire immediately
    ///
    /// Only the acquisition started at `acquired` is cleared.
    async fn release_lease(&self, acquired: &MicroTime) -> Result<(), Error> {
        let Some(lease) = self.store.get(&self.namespace, &self.lock).await? else {
            debug!(identity = %self.identity, "Lease not found, nothing to release");
            return Ok(());
        };

        let spec = lease.spec.as_ref();
        let holder = spec.and_then(|s| s.holder_identity.as_deref());
        if holder != Some(self.identity.as_str()) {
            debug!(identity = %self.identity, "Not the lease holder, nothing to release");
            return Ok(());
        }
        if spec.and_then(|s| s.acquire_time.as_ref()) != Some(acquired) {
            debug!(identity = %self.identity, "Lease acquired again since, nothing to release");
            return Ok(());
        }

        let mut released = lease.clone();
        if let Some(ref mut spec) = released.spec {
            spec.holder_identity = None;
            spec.lease_duration_seconds = Some(1);
            spec.renew_time = Some(MicroTime(Utc::now()));
        }

        if self.store.replace(&released).await? {
            info!(identity = %self.identity, lease = %self.lock, "Lease released");
        } else {
            warn!(identity = %self.identity, "Lease changed during release; leaving it to expire");
        }
        Ok(())
    }

    /// Renew until cancelled or the lease is lost
    async fn renewal_loop(
        &self,
        acquired: MicroTime,
        token: CancellationToken,
        lost: Arc<AtomicBool>,
    ) {
        let mut last_renewed = tokio::time::Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.config.retry_period) => {}
            }

            let attempt = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                result = self.try_acquire_or_renew(Some(&acquired)) => result,
            };

            match attempt {
                Ok(Some(_)) => last_renewed = tokio::time::Instant::now(),
                Ok(None) => {
                    warn!(identity = %self.identity, lease = %self.lock, "Leadership lost");
                    lost.store(true, Ordering::SeqCst);
                    token.cancel();
                    return;
                }
                Err(e) if last_renewed.elapsed() >= self.config.renew_deadline => {
                    warn!(
                        identity = %self.identity,
                        lease = %self.lock,
                        error = %e,
                        "Lease not renewed within deadline, leadership lost"
                    );
                    lost.store(true, Ordering::SeqCst);
                    token.cancel();
                    return;
                }
                Err(e) => {
                    warn!(
                        identity = %self.identity,
                        error = %e,
                        "Failed to renew lease, retrying..."
                    );
                }
            }
        }

        if let Err(e) = self.release_lease(&acquired).await {
            warn!(identity = %self.identity, error = %e, "Failed to release lease");
        }
    }
}

type LockKey = (String, String);

/// Entry point for acquiring leases
///
/// Callers inside one process that ask for the same lease queue behind each
/// other, since they share a holder identity.
pub struct LeaseGate {
    store: Arc<dyn LeaseStore>,
    identity: HolderIdentity,
    config: LeaseConfig,
    local: Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
}

impl LeaseGate {
    /// Create a gate with default timing (10s lease, 5s renew deadline, 2s retry)
    pub fn new(store: Arc<dyn LeaseStore>, identity: HolderIdentity) -> Self {
        Self {
            store,
            identity,
            config: LeaseConfig::default(),
            local: Mutex::new(HashMap::new()),
        }
    }

    /// Block until this process holds the lease, then return a guard
    ///
    /// Control-plane errors during acquisition are returned to the caller.
    /// Cancelling `cancel` before acquisition returns `Cancelled`; after
    /// acquisition it releases the lease.
    pub async fn acquire(
        &self,
        namespace: &str,
        lock: &str,
        cancel: &CancellationToken,
    ) -> Result<LeaseGuard, Error> {
        let operation = format!("acquiring lease {}/{}", namespace, lock);

        let local = {
            let mut locks = self.local.lock().await;
            Arc::clone(
                locks
                    .entry((namespace.to_string(), lock.to_string()))
                    .or_default(),
            )
        };
        let local_guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled(operation)),
            guard = local.lock_owned() => guard,
        };

        let election = Arc::new(Election {
            store: Arc::clone(&self.store),
            namespace: namespace.to_string(),
            lock: lock.to_string(),
            identity: self.identity.clone(),
            config: self.config,
        });

        info!(
            identity = %self.identity,
            lease = %lock,
            namespace = %namespace,
            "Waiting for leadership..."
        );

        let acquired = loop {
            let attempt = election.try_acquire_or_renew(None);
            if let Some(acquired) = cancellable(cancel, &operation, attempt).await? {
                break acquired;
            }
            debug!(
                identity = %self.identity,
                retry_secs = self.config.retry_period.as_secs(),
                "Lease held by another, waiting..."
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::cancelled(operation)),
                _ = tokio::time::sleep(self.config.retry_period) => {}
            }
        };

        info!(identity = %self.identity, lease = %lock, "Leadership acquired");

        let token = cancel.child_token();
        let lost = Arc::new(AtomicBool::new(false));
        let renewal_task = tokio::spawn({
            let election = Arc::clone(&election);
            let token = token.clone();
            let lost = Arc::clone(&lost);
            async move {
                election.renewal_loop(acquired, token, lost).await;
                // Admit the next local caller only once the release is written
                drop(local_guard);
            }
        });

        Ok(LeaseGuard {
            namespace: namespace.to_string(),
            lock: lock.to_string(),
            token,
            lost,
            renewal_task: Some(renewal_task),
        })
    }
}

/// Guard held while this process leads
///
/// Renewal runs in the background until the guard is released, dropped, or
/// leadership is lost.
pub struct LeaseGuard {
    namespace: String,
    lock: String,
    token: CancellationToken,
    lost: Arc<AtomicBool>,
    renewal_task: Option<JoinHandle<()>>,
}

impl LeaseGuard {
    /// Token cancelled when leadership ends for any reason
    ///
    /// Thread this through every call of the protected operation.
    pub fn cancellation(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether the lease was taken away (as opposed to released)
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Wait until leadership ends
    pub async fn ended(&self) {
        self.token.cancelled().await
    }

    /// Report a cancellation caused by losing the lease as `LeadershipLost`
    pub fn explain(&self, err: Error) -> Error {
        if err.is_cancelled() && self.is_lost() {
            Error::leadership_lost(&self.namespace, &self.lock)
        } else {
            err
        }
    }

    /// Release the lease and wait for the release to be written
    pub async fn release(mut self) {
        self.token.cancel();
        if let Some(task) = self.renewal_task.take() {
            if let Err(e) = task.await {
                warn!(lease = %self.lock, error = %e, "Lease renewal task failed");
            }
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        // The renewal task observes the cancellation and releases the lease.
        self.token.cancel();
        debug!(lease = %self.lock, namespace = %self.namespace, "Lease guard dropped");
    }
}
