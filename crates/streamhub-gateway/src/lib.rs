//! `WebSocket` gateway for streamhub.
//!
//! This crate provides an Axum server that lets browser and service
//! clients use a [`Hub`](streamhub_core::Hub) over a single `WebSocket`:
//!
//! - **`WebSocket` endpoint** (`/ws` by default) speaking the JSON
//!   protocol in [`streamhub_types::wire`]
//! - **Health probe** (`GET /health`)
//! - **Client** ([`GatewayClient`]) for Rust services speaking the same
//!   protocol
//!
//! # Architecture
//!
//! ```text
//! socket --> reader task (Session actor) --> Hub.publish / get / set ...
//!                 |
//!                 +-- listen --> Subscription task per stream
//!                                     |
//!            writer task <-- bounded mpsc <-- push frames, replies
//! ```
//!
//! Each connection owns its subscriptions. When the socket closes, every
//! subscription is cancelled and awaited before the session ends.
//!
//! # Modules
//!
//! - [`client`] -- `WebSocket` client with request correlation
//! - [`session`] -- Per-connection actor and request dispatch
//! - [`ws`] -- Upgrade handler, socket reader and writer
//! - [`router`] -- Route table
//! - [`server`] / [`startup`] -- Server lifecycle
//! - [`state`] -- Shared state and leak gauges
//! - [`error`] -- Gateway error types

pub mod client;
pub mod error;
pub mod router;
pub mod server;
pub mod session;
pub mod startup;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use client::{GatewayClient, Listener};
pub use error::{ClientError, GatewayError, ServerError};
pub use router::build_router;
pub use server::{serve, start_server};
pub use session::Session;
pub use startup::{GatewayHandle, StartupError, spawn_gateway};
pub use state::GatewayState;
