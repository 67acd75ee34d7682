//! The hub: namespaced keys and streams on top of a [`Store`].
//!
//! Every name passed to a hub operation is turned into a store key by
//! [`Hub::key`]: `prefix:name`, or `name` unchanged when the prefix is
//! empty. Two hubs with the same prefix over the same store see the same
//! data. To address a raw key, call the operation on
//! [`Hub::unprefixed`] (or [`Hub::scoped`] with `ignore_prefix = true`).

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use streamhub_store::{EventLog, KeyedStore, Store, decode_entries};
use streamhub_types::{EntryId, StreamEvent, StreamPosition, StreamRange};

use crate::config::{HubConfig, RetryPolicy};
use crate::error::{HubError, HubResult};
use crate::subscription::{DeliveryLoop, EventHandler, ListenOptions, Subscription};

/// Handle to a namespaced view of a store. Cheap to clone.
#[derive(Clone)]
pub struct Hub {
    store: Arc<dyn Store>,
    prefix: Arc<str>,
    ready_attempts: u32,
    ready_interval: std::time::Duration,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("prefix", &self.prefix)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Hub {
    /// Create a hub over `store` with the given settings.
    pub fn new(store: Arc<dyn Store>, config: &HubConfig) -> Self {
        Self {
            store,
            prefix: Arc::from(config.prefix.as_str()),
            ready_attempts: config.ready_attempts,
            ready_interval: config.ready_interval(),
            retry: config.retry_policy(),
        }
    }

    /// Create a hub with default settings under `prefix`.
    pub fn with_prefix(store: Arc<dyn Store>, prefix: &str) -> Self {
        Self::new(store, &HubConfig::with_prefix(prefix))
    }

    /// The namespace prefix (possibly empty).
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The backing store.
    pub const fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// A view of the same store that uses names as raw keys.
    #[must_use]
    pub fn unprefixed(&self) -> Self {
        Self {
            prefix: Arc::from(""),
            ..self.clone()
        }
    }

    /// `self`, or [`Hub::unprefixed`] when `ignore_prefix` is set.
    #[must_use]
    pub fn scoped(&self, ignore_prefix: bool) -> Self {
        if ignore_prefix {
            self.unprefixed()
        } else {
            self.clone()
        }
    }

    /// Store key for `name`: `prefix:name` (no doubled `:`), or `name`
    /// itself when the prefix is empty.
    pub fn key(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_owned()
        } else if self.prefix.ends_with(':') {
            format!("{}{name}", self.prefix)
        } else {
            format!("{}:{name}", self.prefix)
        }
    }

    // =========================================================================
    // Streams
    // =========================================================================

    /// Append an event to `stream`. Returns as soon as the append is
    /// durable; it never waits for consumers.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidArgument`] if `stream` or `event_type` is
    /// empty, [`HubError::Serialization`] if `data` cannot be encoded, and
    /// [`HubError::Store`] if the append fails.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        stream: &str,
        event_type: &str,
        data: &T,
    ) -> HubResult<EntryId> {
        if stream.is_empty() {
            return Err(HubError::empty("stream"));
        }
        if event_type.is_empty() {
            return Err(HubError::empty("event type"));
        }
        let payload = serde_json::to_string(data)?;
        let key = self.key(stream);
        let id = self.store.append(&key, event_type, &payload).await?;
        tracing::debug!(stream = %key, event_type, %id, "published event");
        Ok(id)
    }

    /// Subscribe `handler` to `stream`.
    ///
    /// With [`StreamPosition::Latest`] the start is pinned to the stream's
    /// newest entry (or `0-0` when empty) before this returns, so every
    /// event published afterwards is delivered.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidArgument`] for an empty stream name and
    /// [`HubError::Store`] if the start cannot be resolved or a reader
    /// cannot be opened.
    pub async fn listen<H: EventHandler>(
        &self,
        stream: &str,
        handler: H,
        options: ListenOptions,
    ) -> HubResult<Subscription> {
        if stream.is_empty() {
            return Err(HubError::empty("stream"));
        }
        let key = self.key(stream);
        let cursor = match options.start {
            StreamPosition::Latest => self.store.last_id(&key).await?.unwrap_or(EntryId::ZERO),
            StreamPosition::After(id) => id,
        };
        let reader = self.store.open_reader().await?;
        tracing::debug!(stream = %key, %cursor, "listening");
        Ok(DeliveryLoop {
            stream: key,
            cursor,
            reader,
            handler,
            options,
            retry: self.retry,
        }
        .spawn())
    }

    /// Historical events of `stream` inside `range`, ascending.
    /// Malformed entries are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidArgument`] for an empty stream name and
    /// [`HubError::Store`] if the read fails.
    pub async fn get_stream_values(
        &self,
        stream: &str,
        range: &StreamRange,
    ) -> HubResult<Vec<StreamEvent>> {
        if stream.is_empty() {
            return Err(HubError::empty("stream"));
        }
        let key = self.key(stream);
        let entries = self.store.read_range(&key, range).await?;
        Ok(decode_entries(&key, entries))
    }

    // =========================================================================
    // Keys
    // =========================================================================

    /// Read the JSON value at `key`; `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Serialization`] if the stored text is not a
    /// valid `T`, and [`HubError::Store`] if the read fails.
    pub async fn get_val<T: DeserializeOwned>(&self, key: &str) -> HubResult<Option<T>> {
        self.get_raw_val(key)
            .await?
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(HubError::from)
    }

    /// Store `value` as JSON at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Serialization`] if `value` cannot be encoded,
    /// and [`HubError::Store`] if the write fails.
    pub async fn set_val<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> HubResult<()> {
        if key.is_empty() {
            return Err(HubError::empty("key"));
        }
        let json = serde_json::to_string(value)?;
        self.store.set(&self.key(key), &json).await?;
        Ok(())
    }

    /// Read the stored text at `key` without decoding.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Store`] if the read fails.
    pub async fn get_raw_val(&self, key: &str) -> HubResult<Option<String>> {
        if key.is_empty() {
            return Err(HubError::empty("key"));
        }
        Ok(self.store.get(&self.key(key)).await?)
    }

    /// Delete `key` (a value or a whole stream). Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Store`] if the delete fails.
    pub async fn del_key(&self, key: &str) -> HubResult<bool> {
        if key.is_empty() {
            return Err(HubError::empty("key"));
        }
        Ok(self.store.del(&self.key(key)).await? > 0)
    }

    /// Delete every key matching the glob `pattern` (prefixed like a key).
    /// Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Store`] if listing or deleting fails.
    pub async fn del_keys(&self, pattern: &str) -> HubResult<u64> {
        if pattern.is_empty() {
            return Err(HubError::empty("pattern"));
        }
        let pattern = self.key(pattern);
        let removed = self.store.del_matching(&pattern).await?;
        tracing::debug!(%pattern, removed, "deleted keys by pattern");
        Ok(removed)
    }

    /// Full store keys matching the glob `pattern` (prefixed like a key).
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Store`] if listing fails.
    pub async fn get_keys(&self, pattern: &str) -> HubResult<Vec<String>> {
        if pattern.is_empty() {
            return Err(HubError::empty("pattern"));
        }
        Ok(self.store.keys(&self.key(pattern)).await?)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Ping the store until it answers.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotReady`] after the configured number of
    /// failed attempts.
    pub async fn wait_ready(&self) -> HubResult<()> {
        for attempt in 1..=self.ready_attempts {
            match self.store.ping().await {
                Ok(()) => {
                    tracing::info!(prefix = %self.prefix, attempt, "hub ready");
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "store not ready yet, retrying");
                    tokio::time::sleep(self.ready_interval).await;
                }
            }
        }
        Err(HubError::NotReady {
            attempts: self.ready_attempts,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use streamhub_store::MemoryStore;

    use super::*;

    fn hub(prefix: &str) -> Hub {
        Hub::with_prefix(Arc::new(MemoryStore::new()), prefix)
    }

    #[test]
    fn key_joins_prefix_with_single_colon() {
        assert_eq!(hub("app").key("chat"), "app:chat");
        assert_eq!(hub("app:").key("chat"), "app:chat");
        assert_eq!(hub("").key("chat"), "chat");
        assert_eq!(hub("app").unprefixed().key("chat"), "chat");
        assert_eq!(hub("app").scoped(false).key("chat"), "app:chat");
    }

    #[tokio::test]
    async fn empty_names_are_rejected() {
        let hub = hub("app");
        assert!(matches!(
            hub.publish("", "t", &1).await,
            Err(HubError::InvalidArgument(_))
        ));
        assert!(matches!(
            hub.publish("s", "", &1).await,
            Err(HubError::InvalidArgument(_))
        ));
        assert!(matches!(
            hub.get_val::<serde_json::Value>("").await,
            Err(HubError::InvalidArgument(_))
        ));
        assert!(matches!(
            hub.set_val("", &1).await,
            Err(HubError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn set_val_honors_ignore_prefix() {
        let hub = hub("app");
        hub.scoped(true).set_val("raw", &"v").await.unwrap();
        assert_eq!(hub.get_raw_val("raw").await.unwrap(), None);
        assert_eq!(
            hub.unprefixed().get_val::<String>("raw").await.unwrap().as_deref(),
            Some("v")
        );
    }

    #[tokio::test]
    async fn empty_string_is_distinct_from_absent() {
        let hub = hub("app");
        hub.set_val("empty", "").await.unwrap();
        assert_eq!(hub.get_val::<String>("empty").await.unwrap().as_deref(), Some(""));
        assert_eq!(hub.get_val::<String>("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn non_json_value_is_a_serialization_error() {
        let hub = hub("");
        hub.store().set("plain", "not json").await.unwrap();
        assert!(matches!(
            hub.get_val::<serde_json::Value>("plain").await,
            Err(HubError::Serialization(_))
        ));
        assert_eq!(hub.get_raw_val("plain").await.unwrap().as_deref(), Some("not json"));
    }

    #[tokio::test]
    async fn get_keys_returns_full_keys() {
        let hub = hub("app");
        hub.set_val("a:1", &1).await.unwrap();
        hub.set_val("a:2", &2).await.unwrap();
        hub.unprefixed().set_val("a:3", &3).await.unwrap();
        assert_eq!(
            hub.get_keys("a:*").await.unwrap(),
            vec!["app:a:1".to_owned(), "app:a:2".to_owned()]
        );
    }

    #[tokio::test]
    async fn wait_ready_succeeds_on_memory_store() {
        assert!(hub("x").wait_ready().await.is_ok());
    }
}
