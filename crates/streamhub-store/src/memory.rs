//! In-process store.
//!
//! Keys and streams live in maps behind a `tokio::sync::RwLock`. Every
//! append bumps a [`watch`] version counter so parked [`TailReader`]s wake
//! up and re-check their stream. Ids follow the Redis `ms-seq` rule and
//! stay strictly increasing per stream even if the wall clock steps back.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use streamhub_types::{EntryId, StreamRange, now_millis};
use tokio::sync::{RwLock, watch};

use crate::error::{StoreError, StoreResult, require_non_empty};
use crate::pattern::glob_match;
use crate::traits::{EventLog, KeyedStore, RawEntry, TailReader};

#[derive(Debug, Default)]
struct Stream {
    entries: Vec<RawEntry>,
    last_id: EntryId,
}

impl Stream {
    fn after(&self, after: EntryId) -> Vec<RawEntry> {
        let start = self.entries.partition_point(|e| e.id <= after);
        self.entries.iter().skip(start).cloned().collect()
    }
}

#[derive(Debug, Default)]
struct State {
    values: HashMap<String, String>,
    streams: BTreeMap<String, Stream>,
}

/// A [`Store`](crate::Store) kept entirely in memory.
///
/// Cloning yields another handle onto the same data.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    version: Arc<watch::Sender<u64>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (version, _) = watch::channel(0_u64);
        Self {
            state: Arc::new(RwLock::new(State::default())),
            version: Arc::new(version),
        }
    }

    /// Append an entry with arbitrary fields, bypassing payload checks.
    ///
    /// Lets tests inject entries a foreign producer might write.
    pub async fn append_raw(
        &self,
        stream: &str,
        fields: Vec<(String, String)>,
    ) -> StoreResult<EntryId> {
        require_non_empty("stream", stream)?;
        let id = {
            let mut state = self.state.write().await;
            let log = state.streams.entry(stream.to_owned()).or_default();
            let id = log.last_id.successor(now_millis());
            log.entries.push(RawEntry { id, fields });
            log.last_id = id;
            id
        };
        self.version.send_modify(|v| *v = v.wrapping_add(1));
        Ok(id)
    }

    /// Number of stream entries currently held for `stream`.
    pub async fn stream_len(&self, stream: &str) -> usize {
        self.state
            .read()
            .await
            .streams
            .get(stream)
            .map_or(0, |s| s.entries.len())
    }
}

#[async_trait]
impl KeyedStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        require_non_empty("key", key)?;
        Ok(self.state.read().await.values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        require_non_empty("key", key)?;
        let mut state = self.state.write().await;
        state.streams.remove(key);
        state.values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn del(&self, key: &str) -> StoreResult<u64> {
        require_non_empty("key", key)?;
        let mut state = self.state.write().await;
        let removed = state.values.remove(key).is_some() || state.streams.remove(key).is_some();
        Ok(u64::from(removed))
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let state = self.state.read().await;
        let mut keys: Vec<String> = state
            .values
            .keys()
            .chain(state.streams.keys())
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        keys.sort_unstable();
        Ok(keys)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl EventLog for MemoryStore {
    async fn append(&self, stream: &str, event_type: &str, payload: &str) -> StoreResult<EntryId> {
        require_non_empty("stream", stream)?;
        require_non_empty("event type", event_type)?;
        self.append_raw(stream, vec![(event_type.to_owned(), payload.to_owned())])
            .await
    }

    async fn read_range(&self, stream: &str, range: &StreamRange) -> StoreResult<Vec<RawEntry>> {
        require_non_empty("stream", stream)?;
        let state = self.state.read().await;
        Ok(state.streams.get(stream).map_or_else(Vec::new, |s| {
            s.entries
                .iter()
                .filter(|e| range.contains(e.id))
                .take(range.count)
                .cloned()
                .collect()
        }))
    }

    async fn last_id(&self, stream: &str) -> StoreResult<Option<EntryId>> {
        require_non_empty("stream", stream)?;
        let state = self.state.read().await;
        Ok(state
            .streams
            .get(stream)
            .and_then(|s| s.entries.last())
            .map(|e| e.id))
    }

    async fn open_reader(&self) -> StoreResult<Box<dyn TailReader>> {
        Ok(Box::new(MemoryTailReader {
            state: Arc::clone(&self.state),
            version: self.version.subscribe(),
        }))
    }
}

struct MemoryTailReader {
    state: Arc<RwLock<State>>,
    version: watch::Receiver<u64>,
}

#[async_trait]
impl TailReader for MemoryTailReader {
    async fn read_after(&mut self, stream: &str, after: EntryId) -> StoreResult<Vec<RawEntry>> {
        require_non_empty("stream", stream)?;
        loop {
            // Mark the current version seen before looking, so an append
            // racing with the check still wakes the wait below.
            self.version.mark_unchanged();
            let batch = self
                .state
                .read()
                .await
                .streams
                .get(stream)
                .map_or_else(Vec::new, |s| s.after(after));
            if !batch.is_empty() {
                return Ok(batch);
            }
            self.version
                .changed()
                .await
                .map_err(|_closed| StoreError::Closed)?;
        }
    }

    async fn close(self: Box<Self>) {}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use streamhub_types::RangeBound;

    use super::*;

    #[tokio::test]
    async fn ids_are_strictly_increasing() {
        let store = MemoryStore::new();
        let mut last = EntryId::ZERO;
        for n in 0..50 {
            let id = store.append("s", "n", &n.to_string()).await.unwrap();
            assert!(id > last);
            last = id;
        }
    }

    #[tokio::test]
    async fn empty_names_are_invalid() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.append("", "t", "{}").await,
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.append("s", "", "{}").await,
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.get("").await,
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn range_respects_bounds_and_count() {
        let store = MemoryStore::new();
        let mut ids = Vec::new();
        for n in 0..5 {
            ids.push(store.append("s", "n", &n.to_string()).await.unwrap());
        }
        let range = StreamRange {
            start: RangeBound::Id(*ids.get(1).unwrap()),
            end: RangeBound::Id(*ids.get(3).unwrap()),
            count: 2,
        };
        let got: Vec<EntryId> = store
            .read_range("s", &range)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(got, ids.get(1..3).unwrap().to_vec());
    }

    #[tokio::test]
    async fn missing_stream_reads_empty() {
        let store = MemoryStore::new();
        assert!(store.read_range("nope", &StreamRange::all()).await.unwrap().is_empty());
        assert_eq!(store.last_id("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn reader_blocks_until_append() {
        let store = MemoryStore::new();
        let mut reader = store.open_reader().await.unwrap();
        let writer = store.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            writer.append("s", "late", "{}").await
        });
        let batch = tokio::time::timeout(
            Duration::from_secs(2),
            reader.read_after("s", EntryId::ZERO),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(batch.len(), 1);
        handle.await.unwrap().unwrap();
        reader.close().await;
    }

    #[tokio::test]
    async fn reader_returns_only_entries_after_cursor() {
        let store = MemoryStore::new();
        let first = store.append("s", "a", "1").await.unwrap();
        let second = store.append("s", "b", "2").await.unwrap();
        let mut reader = store.open_reader().await.unwrap();
        let batch = reader.read_after("s", first).await.unwrap();
        assert_eq!(batch.iter().map(|e| e.id).collect::<Vec<_>>(), vec![second]);
    }

    #[tokio::test]
    async fn keys_and_pattern_delete_cover_streams() {
        let store = MemoryStore::new();
        store.set("app:a", "1").await.unwrap();
        store.append("app:s", "t", "{}").await.unwrap();
        store.set("other", "1").await.unwrap();
        assert_eq!(
            store.keys("app:*").await.unwrap(),
            vec!["app:a".to_owned(), "app:s".to_owned()]
        );
        assert_eq!(store.del_matching("app:*").await.unwrap(), 2);
        assert_eq!(store.last_id("app:s").await.unwrap(), None);
        assert_eq!(store.get("other").await.unwrap().as_deref(), Some("1"));
    }
}
