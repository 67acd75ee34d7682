//! Key naming shared by every repository.
//!
//! An entity with id `id` keeps its fields under `{baseKey}:{id}:{subkind}`
//! and its event trail in the stream `{baseKey}:{id}:events`. Work requests
//! for a whole repository go through the single stream `{queueKey}`. All
//! names are relative to the hub prefix.

use streamhub_core::{Hub, HubResult};

use crate::error::{RepoError, RepoResult};

/// Base key used when none is configured.
pub const DEFAULT_BASE_KEY: &str = "entities";

/// Queue key used when none is configured.
pub const DEFAULT_QUEUE_KEY: &str = "entityQueue";

/// Subkind used by [`EntityRepo::store_key`] callers that do not name one.
pub const DEFAULT_SUBKIND: &str = "data";

/// Subkind of the per-entity event stream.
pub const EVENTS_SUBKIND: &str = "events";

/// A hub plus the naming scheme for one kind of entity.
#[derive(Debug, Clone)]
pub struct EntityRepo {
    hub: Hub,
    base_key: String,
    queue_key: String,
}

impl EntityRepo {
    /// Repository with the default `entities` / `entityQueue` keys.
    pub fn new(hub: Hub) -> Self {
        Self::with_keys(hub, DEFAULT_BASE_KEY, DEFAULT_QUEUE_KEY)
    }

    /// Repository with explicit base and queue keys.
    pub fn with_keys(hub: Hub, base_key: impl Into<String>, queue_key: impl Into<String>) -> Self {
        Self {
            hub,
            base_key: base_key.into(),
            queue_key: queue_key.into(),
        }
    }

    /// The hub all operations go through.
    pub const fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Root of every entity key.
    pub fn base_key(&self) -> &str {
        &self.base_key
    }

    /// Name of the request queue stream.
    pub fn queue_key(&self) -> &str {
        &self.queue_key
    }

    /// `{baseKey}:{id}:{subkind}`.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::InvalidArgument`] if `id` is empty.
    pub fn store_key(&self, id: &str, subkind: &str) -> RepoResult<String> {
        let id = entity_id(id)?;
        Ok(format!("{}:{id}:{subkind}", self.base_key))
    }

    /// `{baseKey}:{id}:events`.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::InvalidArgument`] if `id` is empty.
    pub fn events_key(&self, id: &str) -> RepoResult<String> {
        self.store_key(id, EVENTS_SUBKIND)
    }

    /// Ping the store until it answers.
    pub async fn wait_ready(&self) -> HubResult<()> {
        self.hub.wait_ready().await
    }
}

/// Reject empty entity ids.
pub(crate) fn entity_id(id: &str) -> RepoResult<&str> {
    if id.is_empty() {
        return Err(RepoError::InvalidArgument(
            "entity id must not be empty".to_owned(),
        ));
    }
    Ok(id)
}
