//! Axum router construction for the gateway.

use std::sync::Arc;

use axum::routing::{any, get};
use axum::{Json, Router};
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::GatewayState;
use crate::ws;

/// Build the gateway router.
///
/// - `{ws_path}` (default `/ws`) -- `WebSocket` endpoint; any request
///   without an upgrade gets 400
/// - `GET /health` -- liveness probe
///
/// CORS allows any origin; clients are not authenticated.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let ws_path = normalize_path(&state.config().ws_path);

    Router::new()
        .route(&ws_path, any(ws::ws_handler))
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_owned()
    } else {
        format!("/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::normalize_path;

    #[test]
    fn ws_path_gets_leading_slash() {
        assert_eq!(normalize_path("ws"), "/ws");
        assert_eq!(normalize_path("/socket"), "/socket");
    }
}
