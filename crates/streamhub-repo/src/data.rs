//! Named data objects.
//!
//! A [`DataRepo`] keeps one typed value under `{prefix}:data:{name}`
//! together with the keys it was saved under. Free-form subkeys live at
//! `{storeKey}:{key}` and change notifications go to `{storeKey}:events`.
//! [`DataRepo::sub_type`] derives a nested object rooted at
//! `{storeKey}:{type}`. All names are relative to the hub prefix.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use streamhub_core::{EventHandler, Hub, ListenOptions, Subscription};
use streamhub_types::{EntryId, StreamEvent, StreamRange};

use crate::entity::EVENTS_SUBKIND;
use crate::error::{RepoError, RepoResult};

/// Stored form of a data object.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot<T> {
    name: String,
    store_key: String,
    queue_key: String,
    #[serde(default)]
    data: T,
}

/// [`Snapshot`] borrowed from a handle for writing.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotRef<'a, T> {
    name: &'a str,
    store_key: &'a str,
    queue_key: &'a str,
    data: &'a T,
}

/// One named, typed data object plus its subkeys and event stream.
#[derive(Debug, Clone)]
pub struct DataRepo<T = Value> {
    hub: Hub,
    name: String,
    prefix: String,
    store_key: String,
    queue_key: String,
    data: T,
}

impl<T> DataRepo<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    /// Handle for `name` under `prefix` without touching the store.
    ///
    /// Keys are `{prefix}:data:{name}` and `{prefix}:dataQueue:{name}`, or
    /// `data:{name}` / `dataQueue:{name}` when `prefix` is empty.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::InvalidArgument`] if `name` is empty.
    pub fn new(hub: Hub, name: &str, prefix: &str) -> RepoResult<Self> {
        if name.is_empty() {
            return Err(RepoError::InvalidArgument(
                "data name must not be empty".to_owned(),
            ));
        }
        let root = |kind: &str| {
            if prefix.is_empty() {
                format!("{kind}:{name}")
            } else {
                format!("{prefix}:{kind}:{name}")
            }
        };
        Ok(Self {
            store_key: root("data"),
            queue_key: root("dataQueue"),
            hub,
            name: name.to_owned(),
            prefix: prefix.to_owned(),
            data: T::default(),
        })
    }

    /// Load `name`, creating it with an empty value if it does not exist.
    pub async fn open(hub: Hub, name: &str, prefix: &str) -> RepoResult<Self> {
        let mut repo = Self::new(hub, name, prefix)?;
        repo.load().await?;
        Ok(repo)
    }

    /// Load or create `name`, then replace its value with `data`.
    pub async fn open_with(hub: Hub, name: &str, prefix: &str, data: T) -> RepoResult<Self> {
        let mut repo = Self::open(hub, name, prefix).await?;
        repo.set_data(data).await?;
        Ok(repo)
    }

    /// Object name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Prefix the keys were derived from.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key of the stored object.
    pub fn store_key(&self) -> &str {
        &self.store_key
    }

    /// Name of the object's queue stream.
    pub fn queue_key(&self) -> &str {
        &self.queue_key
    }

    /// `{storeKey}:events`.
    pub fn events_key(&self) -> String {
        format!("{}:{EVENTS_SUBKIND}", self.store_key)
    }

    /// Local copy of the value.
    pub const fn data(&self) -> &T {
        &self.data
    }

    /// Read the stored object into this handle, or save the handle as the
    /// initial state when nothing is stored yet.
    pub async fn load(&mut self) -> RepoResult<()> {
        match self.hub.get_val::<Snapshot<T>>(&self.store_key).await? {
            Some(stored) => {
                self.name = stored.name;
                self.store_key = stored.store_key;
                self.queue_key = stored.queue_key;
                self.data = stored.data;
                tracing::debug!(key = %self.store_key, "loaded data object");
            }
            None => {
                self.save().await?;
                tracing::debug!(key = %self.store_key, "created data object");
            }
        }
        Ok(())
    }

    /// Store the value together with its names.
    pub async fn save(&self) -> RepoResult<()> {
        let snapshot = SnapshotRef {
            name: self.name.as_str(),
            store_key: self.store_key.as_str(),
            queue_key: self.queue_key.as_str(),
            data: &self.data,
        };
        Ok(self.hub.set_val(&self.store_key, &snapshot).await?)
    }

    /// Re-read the stored value; an absent object reads as the default.
    pub async fn get_data(&mut self) -> RepoResult<&T> {
        self.data = self
            .hub
            .get_val::<Snapshot<T>>(&self.store_key)
            .await?
            .map(|stored| stored.data)
            .unwrap_or_default();
        Ok(&self.data)
    }

    /// Replace the value and save.
    pub async fn set_data(&mut self, data: T) -> RepoResult<()> {
        self.data = data;
        self.save().await
    }

    /// Read the subkey `{storeKey}:{key}`.
    pub async fn get<V: DeserializeOwned>(&self, key: &str) -> RepoResult<Option<V>> {
        Ok(self.hub.get_val(&self.subkey(key)).await?)
    }

    /// Write the subkey `{storeKey}:{key}`.
    pub async fn set<V: Serialize + ?Sized>(&self, key: &str, value: &V) -> RepoResult<()> {
        Ok(self.hub.set_val(&self.subkey(key), value).await?)
    }

    /// Delete the subkey `{storeKey}:{key}`.
    pub async fn del(&self, key: &str) -> RepoResult<bool> {
        Ok(self.hub.del_key(&self.subkey(key)).await?)
    }

    /// Append an event to the object's stream.
    pub async fn publish<P: Serialize + ?Sized>(
        &self,
        event_type: &str,
        data: &P,
    ) -> RepoResult<EntryId> {
        Ok(self
            .hub
            .publish(&self.events_key(), event_type, data)
            .await?)
    }

    /// Subscribe to the object's stream.
    pub async fn listen<H: EventHandler>(
        &self,
        handler: H,
        options: ListenOptions,
    ) -> RepoResult<Subscription> {
        Ok(self
            .hub
            .listen(&self.events_key(), handler, options)
            .await?)
    }

    /// Every event on the object's stream so far.
    pub async fn events(&self) -> RepoResult<Vec<StreamEvent>> {
        Ok(self
            .hub
            .get_stream_values(&self.events_key(), &StreamRange::all())
            .await?)
    }

    /// A nested object rooted at `{storeKey}:{type_name}`, sharing this
    /// object's name. Nothing is read or written until it is used.
    pub fn sub_type(&self, type_name: &str) -> Self {
        let root = format!("{}:{type_name}", self.store_key);
        Self {
            hub: self.hub.clone(),
            name: self.name.clone(),
            queue_key: format!("{root}:queue"),
            prefix: root.clone(),
            store_key: root,
            data: T::default(),
        }
    }

    fn subkey(&self, key: &str) -> String {
        format!("{}:{key}", self.store_key)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use streamhub_store::MemoryStore;

    use super::*;

    fn hub() -> Hub {
        Hub::with_prefix(Arc::new(MemoryStore::new()), "app")
    }

    #[test]
    fn keys_follow_prefix_and_name() {
        let repo = DataRepo::<Value>::new(hub(), "site", "tenant").unwrap();
        assert_eq!(repo.store_key(), "tenant:data:site");
        assert_eq!(repo.queue_key(), "tenant:dataQueue:site");
        assert_eq!(repo.events_key(), "tenant:data:site:events");
        assert_eq!(repo.subkey("theme"), "tenant:data:site:theme");

        let bare = DataRepo::<Value>::new(hub(), "site", "").unwrap();
        assert_eq!(bare.store_key(), "data:site");
    }

    #[test]
    fn sub_types_nest_under_the_store_key() {
        let repo = DataRepo::<Value>::new(hub(), "site", "tenant").unwrap();
        let pages = repo.sub_type("pages");
        assert_eq!(pages.name(), "site");
        assert_eq!(pages.store_key(), "tenant:data:site:pages");
        assert_eq!(pages.queue_key(), "tenant:data:site:pages:queue");
        assert_eq!(pages.events_key(), "tenant:data:site:pages:events");
    }

    #[test]
    fn empty_name_is_rejected() {
        assert!(matches!(
            DataRepo::<Value>::new(hub(), "", "p"),
            Err(RepoError::InvalidArgument(_))
        ));
    }
}
