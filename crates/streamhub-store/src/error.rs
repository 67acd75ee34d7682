//! Error types for the store layer.
//!
//! All backend failures are propagated via [`StoreError`]. Redis errors
//! are wrapped unchanged so callers can log the original message.

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the store layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A caller passed an empty stream, key or event type.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A Redis/Dragonfly operation failed (transport or server error).
    #[error("Redis error: {0}")]
    Redis(#[from] fred::error::Error),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A configuration error (bad URL, unparsable id returned by the server).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The store or reader has been shut down.
    #[error("Store closed")]
    Closed,
}

impl StoreError {
    /// Shorthand for [`StoreError::InvalidArgument`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Whether retrying the same operation later may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Redis(_))
    }
}

/// Fail with [`StoreError::InvalidArgument`] when `value` is empty.
pub(crate) fn require_non_empty(what: &str, value: &str) -> StoreResult<()> {
    if value.is_empty() {
        return Err(StoreError::invalid(format!("{what} must not be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StoreError::invalid("stream must not be empty");
        assert_eq!(err.to_string(), "Invalid argument: stream must not be empty");
        assert!(!err.is_transient());
        assert_eq!(StoreError::Closed.to_string(), "Store closed");
    }

    #[test]
    fn empty_values_are_rejected() {
        assert!(require_non_empty("key", "").is_err());
        assert!(require_non_empty("key", "k").is_ok());
    }
}
