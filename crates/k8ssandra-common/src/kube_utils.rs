//! Shared Kubernetes utilities using kube-rs
//!
//! Polling, cancellation and client construction used by every lifecycle
//! operation.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::Error;

/// Namespace used when neither the caller nor the kubeconfig names one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval and timeout for one polled wait
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitConfig {
    /// Time between predicate evaluations
    pub interval: Duration,
    /// Maximum total time to wait
    pub timeout: Duration,
}

impl WaitConfig {
    /// Create a wait configuration
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Same interval, different timeout
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }
}

/// Race a future against cancellation
///
/// The future is dropped as soon as `cancel` fires, which aborts any
/// in-flight API request it owns.
pub async fn cancellable<T, Fut>(
    cancel: &CancellationToken,
    operation: &str,
    fut: Fut,
) -> Result<T, Error>
where
    Fut: Future<Output = Result<T, Error>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::cancelled(operation)),
        result = fut => result,
    }
}

/// Poll until a condition is met, the timeout elapses, or the caller cancels
///
/// The first check runs immediately, then once per `interval`. A check
/// returning `Ok(false)` is retried; a check returning `Err` stops polling
/// and the error is returned as-is. When `timeout` elapses the result is
/// `Error::DeadlineExceeded` naming `waiting_for`. Cancellation aborts the
/// check in flight as well as the sleep between checks.
pub async fn poll_until<F, Fut>(
    cancel: &CancellationToken,
    wait: WaitConfig,
    waiting_for: impl Into<String>,
    mut check_fn: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let waiting_for = waiting_for.into();

    let polling = async {
        loop {
            match check_fn().await {
                Ok(true) => return Ok(()),
                Ok(false) => {
                    trace!(
                        waiting_for = %waiting_for,
                        "Polling condition not yet met, retrying..."
                    );
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(wait.interval).await;
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::cancelled(format!("waiting for {}", waiting_for))),
        result = tokio::time::timeout(wait.timeout, polling) => match result {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!(
                    waiting_for = %waiting_for,
                    timeout_secs = wait.timeout.as_secs(),
                    "Polling timed out"
                );
                Err(Error::deadline_exceeded(waiting_for.clone(), wait.timeout))
            }
        },
    }
}

/// Where to find the cluster and which identity to use
#[derive(Clone, Debug, Default)]
pub struct ClientOptions<'a> {
    /// Explicit kubeconfig file; the default inference chain is used when absent
    pub kubeconfig: Option<&'a Path>,
    /// Kubeconfig context to use instead of the current one
    pub context: Option<&'a str>,
}

/// Create a kube client and report the namespace of the selected context
pub async fn create_client(options: ClientOptions<'_>) -> Result<(Client, String), Error> {
    create_client_with_timeout(options, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client with custom timeouts
pub async fn create_client_with_timeout(
    options: ClientOptions<'_>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<(Client, String), Error> {
    let config_options = KubeConfigOptions {
        context: options.context.map(str::to_string),
        ..Default::default()
    };

    let mut config = match options.kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::validation(format!(
                    "failed to read kubeconfig {}: {}",
                    path.display(),
                    e
                ))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &config_options)
                .await
                .map_err(|e| Error::validation(format!("failed to load kubeconfig: {}", e)))?
        }
        None if options.context.is_some() => Config::from_kubeconfig(&config_options)
            .await
            .map_err(|e| Error::validation(format!("failed to load kubeconfig: {}", e)))?,
        None => Config::infer()
            .await
            .map_err(|e| Error::validation(format!("failed to infer kube config: {}", e)))?,
    };

    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    let namespace = config.default_namespace.clone();

    let client = Client::try_from(config)?;
    Ok((client, namespace))
}
