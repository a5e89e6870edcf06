//! Error types for k8ssandra lifecycle operations
//!
//! Errors are structured with fields naming the resource involved so that
//! the message printed by the CLI is actionable without extra logging.
//! Every variant is fatal to the operation that produced it; nothing here
//! is retried automatically.

use std::time::Duration;

use thiserror::Error;

/// Main error type for lifecycle operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error that does not map onto a more specific variant
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Target resource does not exist
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        /// Resource kind (e.g., "CassandraDatacenter")
        kind: String,
        /// Resource name
        name: String,
        /// Resource namespace
        namespace: String,
    },

    /// A concurrent write changed the resource between read and write
    #[error("conflicting update to {kind} {namespace}/{name}: {message}")]
    Conflict {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
        /// Resource namespace
        namespace: String,
        /// Message returned by the API server
        message: String,
    },

    /// A resource with the same identity already exists
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
        /// Resource namespace
        namespace: String,
    },

    /// The resource is in a state that does not allow the requested operation
    #[error("invalid state for {resource}: {message}")]
    InvalidState {
        /// Resource the check was made against (e.g., "CassandraDatacenter ns/dc1")
        resource: String,
        /// Description of why the operation is not allowed
        message: String,
    },

    /// Polling exhausted its timeout before the awaited condition held
    #[error(
        "timed out after {}s waiting for {waiting_for}; the request was submitted, re-run with --wait to keep waiting",
        .timeout.as_secs()
    )]
    DeadlineExceeded {
        /// What was being waited for
        waiting_for: String,
        /// The timeout that elapsed
        timeout: Duration,
    },

    /// The datacenter has no member pod that can be targeted
    #[error("no member pods available for datacenter {namespace}/{datacenter}")]
    NoMemberAvailable {
        /// Datacenter name
        datacenter: String,
        /// Datacenter namespace
        namespace: String,
    },

    /// The operation was cancelled before it finished
    #[error("operation cancelled: {operation}")]
    Cancelled {
        /// Operation that was interrupted
        operation: String,
    },

    /// Leadership of the lease was lost while the protected operation ran
    #[error("lost leadership of lease {namespace}/{lock}; operation aborted")]
    LeadershipLost {
        /// Lease namespace
        namespace: String,
        /// Lease name
        lock: String,
    },

    /// The per-node management endpoint rejected or failed a call
    #[error("management API call to pod {pod} failed: {message}")]
    ManagementApi {
        /// Pod the call was directed at
        pod: String,
        /// Description of what failed
        message: String,
    },

    /// Local filesystem error
    #[error("{context}: {source}")]
    Io {
        /// What was being done (e.g., "reading /tmp/users.txt")
        context: String,
        /// The underlying io error
        source: std::io::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Invalid input
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
    },
}

impl Error {
    /// Create a not-found error for the given resource
    pub fn not_found(
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Create an invalid-state error
    pub fn invalid_state(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidState {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a deadline-exceeded error
    pub fn deadline_exceeded(waiting_for: impl Into<String>, timeout: Duration) -> Self {
        Self::DeadlineExceeded {
            waiting_for: waiting_for.into(),
            timeout,
        }
    }

    /// Create a no-member-available error
    pub fn no_member_available(
        datacenter: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self::NoMemberAvailable {
            datacenter: datacenter.into(),
            namespace: namespace.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a leadership-lost error
    pub fn leadership_lost(namespace: impl Into<String>, lock: impl Into<String>) -> Self {
        Self::LeadershipLost {
            namespace: namespace.into(),
            lock: lock.into(),
        }
    }

    /// Create a management API error
    pub fn management_api(pod: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ManagementApi {
            pod: pod.into(),
            message: msg.into(),
        }
    }

    /// Create an io error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Translate a kube-rs error for a specific resource into the taxonomy
    ///
    /// 404 becomes `NotFound`, 409 becomes `AlreadyExists` when the API
    /// server says so and `Conflict` otherwise. Everything else stays a
    /// plain `Kube` error.
    pub fn from_kube(err: kube::Error, kind: &str, name: &str, namespace: &str) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => Self::not_found(kind, name, namespace),
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Self::AlreadyExists {
                    kind: kind.to_string(),
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                }
            }
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
                message: ae.message,
            },
            other => Self::Kube { source: other },
        }
    }

    /// Whether this error means the target resource is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this error is a lost optimistic-concurrency race
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether this error is a polling timeout
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }

    /// Whether this error is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
