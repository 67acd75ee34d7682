//! Background startup helper.
//!
//! [`spawn_gateway`] binds eagerly, so address errors surface to the
//! caller, then serves on a background task. The returned address is the
//! one actually bound, which matters when the configured port is `0`.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::error::ServerError;
use crate::server::{bind, serve};
use crate::state::GatewayState;

/// Errors that can occur when spawning the gateway.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The server failed to bind.
    #[error("server start error: {0}")]
    Server(#[from] ServerError),
}

/// Running gateway task.
#[derive(Debug)]
pub struct GatewayHandle {
    /// Bound address.
    pub addr: SocketAddr,
    /// Server task; abort it to stop serving.
    pub task: JoinHandle<()>,
}

/// Bind and serve the gateway on a background task.
///
/// # Errors
///
/// Returns [`StartupError::Server`] if the configured address cannot be
/// bound.
pub async fn spawn_gateway(state: Arc<GatewayState>) -> Result<GatewayHandle, StartupError> {
    let listener = bind(&state).await?;
    let addr = listener
        .local_addr()
        .map_err(|e| ServerError::Bind(format!("no local address: {e}")))?;

    let task = tokio::spawn(async move {
        if let Err(e) = serve(listener, state, std::future::pending()).await {
            tracing::error!(error = %e, "gateway exited with error");
        }
    });

    tracing::info!(%addr, "gateway spawned on background task");
    Ok(GatewayHandle { addr, task })
}
