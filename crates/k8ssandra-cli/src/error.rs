//! Error types for the CLI

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failure of a lifecycle operation
    #[error(transparent)]
    Operation(#[from] k8ssandra_common::Error),

    /// Invalid combination of arguments
    #[error("{message}")]
    Validation {
        /// What's wrong with the invocation
        message: String,
    },
}

impl Error {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }
}
