//! Shared gateway state.
//!
//! [`GatewayState`] is handed to every connection. Besides the hub and
//! the configuration it keeps two gauges used to detect leaks: the number
//! of open sessions and the number of subscription tasks still running.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use streamhub_core::{GatewayConfig, Hub};

/// State shared by the router and all sessions.
#[derive(Debug)]
pub struct GatewayState {
    hub: Hub,
    config: GatewayConfig,
    sessions: Arc<AtomicUsize>,
    subscriptions: Arc<AtomicUsize>,
}

impl GatewayState {
    /// State serving `hub` with the given settings.
    pub fn new(hub: Hub, config: GatewayConfig) -> Self {
        Self {
            hub,
            config,
            sessions: Arc::new(AtomicUsize::new(0)),
            subscriptions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The hub requests are executed against.
    pub const fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Gateway settings.
    pub const fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Connections whose session has not finished closing.
    pub fn live_sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Subscription tasks started by sessions that have not yet exited.
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    pub(crate) fn track_session(&self) -> Gauge {
        Gauge::acquire(&self.sessions)
    }

    pub(crate) fn track_subscription(&self) -> Gauge {
        Gauge::acquire(&self.subscriptions)
    }
}

/// One unit of a gauge, released on drop.
#[derive(Debug)]
pub(crate) struct Gauge(Arc<AtomicUsize>);

impl Gauge {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for Gauge {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
