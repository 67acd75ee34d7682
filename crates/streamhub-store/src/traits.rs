//! Store trait definitions.
//!
//! A backend implements [`KeyedStore`] (string values under keys) and
//! [`EventLog`] (append-only ordered streams); anything implementing both
//! is a [`Store`]. Blocking tail reads go through a [`TailReader`], which
//! owns its own connection so a reader parked in a blocking wait never
//! stalls the shared handle.

use async_trait::async_trait;
use streamhub_types::{EntryId, StreamRange};

use crate::error::StoreResult;

/// One stream entry as stored, before payload decoding.
///
/// Entries written by this crate carry exactly one field: the event type
/// mapped to the JSON payload. Entries written by other tools may carry
/// any number of fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// Entry id assigned by the log.
    pub id: EntryId,
    /// Field/value pairs in stored order.
    pub fields: Vec<(String, String)>,
}

impl RawEntry {
    /// Build an entry with a single `event_type -> payload` field.
    pub fn single(id: EntryId, event_type: &str, payload: &str) -> Self {
        Self {
            id,
            fields: vec![(event_type.to_owned(), payload.to_owned())],
        }
    }
}

/// String values under flat keys.
#[async_trait]
pub trait KeyedStore: Send + Sync {
    /// Read the value at `key`; `None` when the key does not exist.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Store `value` at `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Delete `key`. Returns the number of keys removed (0 or 1).
    async fn del(&self, key: &str) -> StoreResult<u64>;

    /// List every key matching a glob pattern.
    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Delete every key matching a glob pattern, streams included.
    async fn del_matching(&self, pattern: &str) -> StoreResult<u64> {
        let mut removed = 0_u64;
        for key in self.keys(pattern).await? {
            removed = removed.saturating_add(self.del(&key).await?);
        }
        Ok(removed)
    }

    /// Check the backend is reachable.
    async fn ping(&self) -> StoreResult<()>;
}

/// Append-only, strictly ordered event streams.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append one entry with a generated id.
    ///
    /// Fails with `InvalidArgument` if `stream` or `event_type` is empty.
    async fn append(&self, stream: &str, event_type: &str, payload: &str) -> StoreResult<EntryId>;

    /// Entries inside `range`, ascending, at most `range.count`.
    async fn read_range(&self, stream: &str, range: &StreamRange) -> StoreResult<Vec<RawEntry>>;

    /// Id of the newest entry; `None` for an empty or missing stream.
    async fn last_id(&self, stream: &str) -> StoreResult<Option<EntryId>>;

    /// Open a reader with its own connection for blocking tail reads.
    async fn open_reader(&self) -> StoreResult<Box<dyn TailReader>>;
}

/// A blocking reader over one connection.
#[async_trait]
pub trait TailReader: Send {
    /// Wait until at least one entry exists after `after`, then return
    /// every such entry in ascending order.
    ///
    /// Never busy-polls. Dropping the returned future abandons the wait;
    /// call [`TailReader::close`] afterwards to release the connection.
    async fn read_after(&mut self, stream: &str, after: EntryId) -> StoreResult<Vec<RawEntry>>;

    /// Release the reader, interrupting any wait still parked server-side.
    async fn close(self: Box<Self>);
}

/// A complete backend.
pub trait Store: KeyedStore + EventLog {}

impl<T: KeyedStore + EventLog + ?Sized> Store for T {}
