//! Error types for the streamhub binary.
//!
//! [`AppError`] wraps every failure that can stop the server during
//! startup or while serving, so `main` can propagate with `?`.

/// Top-level error for the streamhub binary.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: streamhub_core::ConfigError,
    },

    /// The backing store could not be reached.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: streamhub_store::StoreError,
    },

    /// The hub failed its readiness check.
    #[error("hub error: {source}")]
    Hub {
        /// The underlying hub error.
        #[from]
        source: streamhub_core::HubError,
    },

    /// The gateway failed to bind or exited with an error.
    #[error("gateway error: {source}")]
    Gateway {
        /// The underlying server error.
        #[from]
        source: streamhub_gateway::ServerError,
    },

    /// Logging could not be initialized.
    #[error("logging error: {message}")]
    Logging {
        /// Description of the failure.
        message: String,
    },
}
