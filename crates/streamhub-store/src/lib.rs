//! Storage backends for streamhub.
//!
//! A backend is a flat key/value space plus append-only event streams.
//! [`RedisStore`] talks to Redis or `Dragonfly`; [`MemoryStore`] keeps
//! everything in-process for tests and single-node deployments.
//!
//! # Architecture
//!
//! ```text
//! Hub
//!  |
//!  +-- KeyedStore  get / set / del / keys     (shared connection)
//!  +-- EventLog    append / read_range / last_id
//!       |
//!       +-- TailReader  read_after (blocking)  (one connection per reader)
//! ```
//!
//! # Modules
//!
//! - [`traits`] -- `KeyedStore`, `EventLog`, `TailReader`, `Store`
//! - [`redis`] -- `fred`-backed Redis / `Dragonfly` implementation
//! - [`memory`] -- In-process implementation
//! - [`decode`] -- Raw entry to `StreamEvent` decoding
//! - [`pattern`] -- Glob matching for key patterns
//! - [`error`] -- Shared error types

pub mod decode;
pub mod error;
pub mod memory;
pub mod pattern;
pub mod redis;
pub mod traits;

// Re-export primary types for convenience.
pub use decode::{decode_entries, decode_entry};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use pattern::glob_match;
pub use redis::{ReconnectOptions, RedisStore};
pub use traits::{EventLog, KeyedStore, RawEntry, Store, TailReader};
