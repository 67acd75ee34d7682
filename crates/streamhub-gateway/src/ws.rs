//! `WebSocket` endpoint.
//!
//! Clients connect to `GET {ws_path}` and exchange JSON text frames (see
//! [`streamhub_types::wire`]). The socket is split: the connection task
//! reads frames and drives the [`Session`], and a writer task drains the
//! session's bounded channel into the socket.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::session::Session;
use crate::state::GatewayState;

/// Upgrade to a `WebSocket`, or answer 400 for plain HTTP requests.
///
/// # Route
///
/// `{ws_path}` (default `/ws`)
pub async fn ws_handler(
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    match upgrade {
        Ok(ws) => ws.on_upgrade(move |socket| handle_socket(socket, state)),
        Err(rejection) => {
            debug!(%rejection, "rejected non-WebSocket request");
            (StatusCode::BAD_REQUEST, "WebSocket endpoint only").into_response()
        }
    }
}

/// Run one connection until the client goes away, then tear its session
/// down.
async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    let (sink, mut incoming) = socket.split();
    let (outbound, frames) = mpsc::channel(state.config().outbound_buffer.max(1));
    let writer = tokio::spawn(write_frames(sink, frames));

    let mut session = Session::new(state, outbound);
    let connection = session.connection();
    info!(%connection, "client connected");

    while let Some(message) = incoming.next().await {
        let open = match message {
            Ok(Message::Text(text)) => session.handle_text(text.as_str()).await,
            Ok(Message::Close(_)) => false,
            // The socket answers pings itself.
            Ok(Message::Ping(_) | Message::Binary(_) | Message::Pong(_)) => true,
            Err(e) => {
                debug!(%connection, error = %e, "WebSocket error");
                false
            }
        };
        if !open {
            break;
        }
    }

    session.close().await;
    if let Err(e) = writer.await {
        warn!(%connection, error = %e, "writer task failed");
    }
    info!(%connection, "client disconnected");
}

/// Forward queued frames to the socket until every sender is gone or the
/// socket fails.
async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<Message>,
) {
    while let Some(message) = frames.recv().await {
        if let Err(e) = sink.send(message).await {
            debug!(error = %e, "WebSocket send failed");
            return;
        }
    }
    if let Err(e) = sink.close().await {
        debug!(error = %e, "WebSocket close failed");
    }
}
