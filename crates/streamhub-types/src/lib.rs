//! Shared type definitions for streamhub.
//!
//! This crate is the single source of truth for the values that cross
//! crate and process boundaries: stream entry ids, events, read ranges,
//! the gateway wire protocol and the entity records kept by the
//! repository layer. Types flow to `TypeScript` via `ts-rs` for browser
//! clients.
//!
//! # Modules
//!
//! - [`ids`] -- Stream entry ids plus connection and entity identifiers
//! - [`event`] -- Stream events, cursor positions, historical ranges
//! - [`wire`] -- Gateway client requests and server frames
//! - [`entities`] -- Action, log and worker records

pub mod entities;
pub mod event;
pub mod ids;
pub mod wire;

// Re-export all public types at crate root for convenience.
pub use entities::{
    ActionRecord, ActionSnapshot, ActionStatus, LogRecord, WorkerInfo, WorkerStatus, now_millis,
};
pub use event::{DEFAULT_RANGE_COUNT, RangeBound, StreamEvent, StreamPosition, StreamRange};
pub use ids::{ActionId, ConnectionId, EntryId, LogId, ParseIdError, WorkerId};
pub use wire::{
    ClientRequest, Envelope, FrameType, Inbound, KeyTarget, PatternTarget, ProtocolError,
    PublishRequest, ServerFrame, SetValRequest, StreamTarget, StreamValuesRequest, parse_inbound,
};
