//! Entity repositories for streamhub.
//!
//! Repositories give names to hub keys and streams for three kinds of
//! entity (action requests, log records, worker registrations) and for
//! named data objects. Each entity owns the keys
//! `{baseKey}:{id}:{subkind}` and an event stream `{baseKey}:{id}:events`;
//! a repository-wide queue stream carries work requests.
//!
//! # Architecture
//!
//! ```text
//! ActionRepo / LogRepo / WorkerRepo        DataRepo<T>
//!     |                                      |
//!     |                                      +-- Hub
//!     +-- EntityRepo (baseKey, queueKey, key naming)
//!             |
//!             +-- Hub (prefix, publish/listen/get/set)
//! ```
//!
//! # Modules
//!
//! - [`entity`] -- Key naming shared by all repositories
//! - [`action`] -- Action requests and their lifecycle events
//! - [`log`] -- Log records on a shared stream
//! - [`worker`] -- Worker registry and heartbeats
//! - [`data`] -- Named typed data objects with subkeys and events
//! - [`error`] -- Repository error types

pub mod action;
pub mod data;
pub mod entity;
pub mod error;
pub mod log;
pub mod worker;

// Re-export primary types for convenience.
pub use action::{ActionRepo, ActionRequest, FINISHED_EVENT_TYPES};
pub use data::DataRepo;
pub use entity::EntityRepo;
pub use error::{RepoError, RepoResult};
pub use log::LogRepo;
pub use worker::{DEFAULT_HEARTBEAT_INTERVAL, Worker, WorkerRepo};
