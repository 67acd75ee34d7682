//! Gateway HTTP server lifecycle.
//!
//! [`start_server`] binds the configured address; [`serve`] runs on an
//! already bound listener (tests bind port 0). Both run until `shutdown`
//! resolves.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::error::ServerError;
use crate::router::build_router;
use crate::state::GatewayState;

/// Bind `host:port` from the gateway configuration.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the address is invalid or in use.
pub async fn bind(state: &GatewayState) -> Result<TcpListener, ServerError> {
    let config = state.config();
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| ServerError::Bind(format!("invalid address: {e}")))?;

    TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(format!("bind failed on {addr}: {e}")))
}

/// Serve the gateway on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns [`ServerError::Serve`] on a fatal I/O error.
pub async fn serve<F>(
    listener: TcpListener,
    state: Arc<GatewayState>,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener
        .local_addr()
        .map_err(|e| ServerError::Bind(format!("no local address: {e}")))?;
    let ws_path = state.config().ws_path.clone();
    let router = build_router(state);

    info!(%addr, %ws_path, "gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServerError::Serve(format!("serve error: {e}")))?;

    info!("gateway stopped");
    Ok(())
}

/// Bind the configured address and serve until `shutdown` resolves.
///
/// # Errors
///
/// Returns [`ServerError`] if binding or serving fails.
pub async fn start_server<F>(state: Arc<GatewayState>, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = bind(&state).await?;
    serve(listener, state, shutdown).await
}
