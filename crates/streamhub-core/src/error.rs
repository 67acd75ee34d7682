//! Error types for the hub.

use streamhub_store::StoreError;

/// Result type for hub operations.
pub type HubResult<T> = Result<T, HubError>;

/// Errors that can occur in hub operations.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// An empty stream name, key or event type was supplied.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A value could not be converted to or from JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store did not answer a ping within the configured attempts.
    #[error("store not ready after {attempts} attempts")]
    NotReady {
        /// Number of pings tried.
        attempts: u32,
    },
}

impl HubError {
    pub(crate) fn empty(what: &str) -> Self {
        Self::InvalidArgument(format!("{what} must not be empty"))
    }
}
