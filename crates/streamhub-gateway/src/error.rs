//! Error types for the gateway.
//!
//! Nothing a client sends can close its connection: every
//! [`GatewayError`] is turned into a [`ServerFrame`] with
//! [`GatewayError::into_frame`] and sent back like any other response.

use streamhub_core::HubError;
use streamhub_types::{ParseIdError, ProtocolError, ServerFrame};

/// Errors that can occur while handling one client request.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The frame could not be decoded into a request.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A `start` or `end` bound of `getStreamValues` is malformed.
    #[error("invalid range bound: {0}")]
    Range(#[from] ParseIdError),

    /// The hub rejected or failed the operation.
    #[error(transparent)]
    Hub(#[from] HubError),

    /// A reply could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GatewayError {
    /// The frame reporting this error to the client.
    pub fn into_frame(self) -> ServerFrame {
        match self {
            Self::Protocol(e) => ServerFrame::protocol_error(e),
            other => ServerFrame::failure(other.to_string()),
        }
    }
}

/// Errors that can occur when starting or running the gateway server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to the network address.
    #[error("bind error: {0}")]
    Bind(String),

    /// The server encountered a fatal error while serving.
    #[error("serve error: {0}")]
    Serve(String),
}

/// Errors returned by [`GatewayClient`](crate::client::GatewayClient).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The `WebSocket` handshake failed.
    #[error("connect error: {0}")]
    Connect(String),

    /// The connection ended before the answer arrived.
    #[error("connection closed")]
    Closed,

    /// No answer arrived for the request in time.
    #[error("request {0} timed out")]
    Timeout(String),

    /// The gateway answered with an error.
    #[error("gateway error: {0}")]
    Server(String),

    /// The gateway answered with a frame of the wrong shape.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    /// A request or reply could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
