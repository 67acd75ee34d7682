//! Stream hub for streamhub.
//!
//! The hub turns a raw [`Store`](streamhub_store::Store) into a namespaced
//! publish/subscribe and key/value service. Producers append events with
//! [`Hub::publish`]; consumers attach handlers with [`Hub::listen`], each
//! of which gets its own cursor and delivery task.
//!
//! # Architecture
//!
//! ```text
//! publish --> EventLog.append (XADD)
//!
//! listen  --> resolve "$" to last id
//!             spawn DeliveryLoop
//!                 loop: TailReader.read_after (XREAD BLOCK 0)
//!                       decode -> handler -> advance cursor
//! ```
//!
//! # Modules
//!
//! - [`hub`] -- Key namespacing and the publish/listen/get/set vocabulary
//! - [`subscription`] -- Delivery loop, handler contract, listen options
//! - [`config`] -- YAML configuration with environment overrides
//! - [`error`] -- Hub error types

pub mod config;
pub mod error;
pub mod hub;
pub mod subscription;

// Re-export primary types for convenience.
pub use config::{
    ConfigError, GatewayConfig, HubConfig, LogFormat, LoggingConfig, RetryPolicy, StoreBackend,
    StoreConfig, StreamhubConfig,
};
pub use error::{HubError, HubResult};
pub use hub::Hub;
pub use subscription::{
    DEFAULT_TERMINAL_TYPE, EventHandler, Flow, ListenOptions, Subscription, SubscriptionEnd,
};
