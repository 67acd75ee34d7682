//! Error types for the repository layer.

use streamhub_core::HubError;

/// Result type for repository operations.
pub type RepoResult<T> = Result<T, RepoError>;

/// Errors that can occur in repository operations.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// An empty entity id was supplied.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The hub (or the store below it) failed.
    #[error(transparent)]
    Hub(#[from] HubError),

    /// A stored value did not have the expected shape.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
}
