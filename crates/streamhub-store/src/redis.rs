//! Redis / `Dragonfly` backend over [`fred`].
//!
//! One shared multiplexed client serves every non-blocking command
//! (`GET`/`SET`/`DEL`/`SCAN`/`XADD`/`XRANGE`). Each [`TailReader`] gets a
//! dedicated connection because `XREAD BLOCK 0` parks the connection it
//! runs on until an entry arrives.
//!
//! Every connection, reader connections included, reconnects on its own
//! with exponential backoff (see [`ReconnectOptions`]). A read that fails
//! while the server is away surfaces as a transport error and is retried by
//! the caller at the same cursor once the connection is back.
//!
//! # Commands
//!
//! | Operation | Command |
//! |-----------|---------|
//! | `append` | `XADD {stream} * {type} {payload}` |
//! | `read_range` | `XRANGE {stream} {start} {end} COUNT {n}` |
//! | `last_id` | `XREVRANGE {stream} + - COUNT 1` |
//! | `read_after` | `XREAD BLOCK 0 STREAMS {stream} {id}` |
//! | `keys` | `SCAN MATCH {pattern}` |

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use fred::prelude::*;
use futures::TryStreamExt;
use streamhub_types::{EntryId, StreamRange};

use crate::error::{StoreError, StoreResult, require_non_empty};
use crate::traits::{EventLog, KeyedStore, RawEntry, TailReader};

/// `SCAN` page size hint.
const SCAN_COUNT: u32 = 500;

/// Upper bound on waiting for `QUIT` when a reader is closed.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Stream entry as returned by `XRANGE` / `XREAD`.
type WireEntry = (String, HashMap<String, String>);

/// Reconnection behavior after a dropped connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectOptions {
    /// Attempts before giving up; `0` retries forever.
    pub max_attempts: u32,
    /// First delay, in milliseconds.
    pub min_delay_ms: u32,
    /// Cap on the doubling delay, in milliseconds.
    pub max_delay_ms: u32,
}

impl ReconnectOptions {
    fn policy(self) -> ReconnectPolicy {
        let min = self.min_delay_ms.max(1);
        ReconnectPolicy::new_exponential(self.max_attempts, min, self.max_delay_ms.max(min), 2)
    }
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            min_delay_ms: 100,
            max_delay_ms: 5_000,
        }
    }
}

/// Connection handle to a Redis-compatible server.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
}

impl RedisStore {
    /// Connect to the server at `url` (`redis://host:port[/db]`) with the
    /// default reconnect policy.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the URL cannot be parsed.
    /// Returns [`StoreError::Redis`] if the connection fails.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        Self::connect_with(url, ReconnectOptions::default()).await
    }

    /// Connect to the server at `url`, reconnecting per `reconnect` after
    /// the connection drops.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the URL cannot be parsed.
    /// Returns [`StoreError::Redis`] if the first connection fails.
    pub async fn connect_with(url: &str, reconnect: ReconnectOptions) -> StoreResult<Self> {
        let config = Config::from_url(url)
            .map_err(|e| StoreError::Config(format!("Invalid Redis URL: {e}")))?;

        let mut builder = Builder::from_config(config);
        builder.set_policy(reconnect.policy());
        let client = builder.build()?;
        client.init().await?;

        tracing::info!(?reconnect, "Connected to Redis");
        Ok(Self { client })
    }

    /// Return a reference to the underlying [`Client`].
    pub const fn client(&self) -> &Client {
        &self.client
    }

    /// Close the shared connection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Redis`] if `QUIT` fails.
    pub async fn quit(&self) -> StoreResult<()> {
        self.client.quit().await?;
        Ok(())
    }
}

#[async_trait]
impl KeyedStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        require_non_empty("key", key)?;
        Ok(self.client.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        require_non_empty("key", key)?;
        let _: () = self.client.set(key, value, None, None, false).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> StoreResult<u64> {
        require_non_empty("key", key)?;
        Ok(self.client.del(key).await?)
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let keys: Vec<Key> = self
            .client
            .scan_buffered(pattern, Some(SCAN_COUNT), None)
            .try_collect()
            .await?;
        let mut keys: Vec<String> = keys.into_iter().filter_map(Key::into_string).collect();
        // SCAN may report a key more than once.
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn del_matching(&self, pattern: &str) -> StoreResult<u64> {
        let keys = self.keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        tracing::debug!(pattern, count = keys.len(), "deleting keys by pattern");
        Ok(self.client.del(keys).await?)
    }

    async fn ping(&self) -> StoreResult<()> {
        let _: String = self.client.ping(None).await?;
        Ok(())
    }
}

#[async_trait]
impl EventLog for RedisStore {
    async fn append(&self, stream: &str, event_type: &str, payload: &str) -> StoreResult<EntryId> {
        require_non_empty("stream", stream)?;
        require_non_empty("event type", event_type)?;
        let id: String = self
            .client
            .xadd(stream, false, None, "*", vec![(event_type, payload)])
            .await?;
        parse_entry_id(&id)
    }

    async fn read_range(&self, stream: &str, range: &StreamRange) -> StoreResult<Vec<RawEntry>> {
        require_non_empty("stream", stream)?;
        let count = u64::try_from(range.count).unwrap_or(u64::MAX);
        let entries: Vec<WireEntry> = self
            .client
            .xrange_values(stream, range.start_arg(), range.end_arg(), Some(count))
            .await?;
        entries.into_iter().map(raw_entry).collect()
    }

    async fn last_id(&self, stream: &str) -> StoreResult<Option<EntryId>> {
        require_non_empty("stream", stream)?;
        let entries: Vec<WireEntry> = self
            .client
            .xrevrange_values(stream, "+", "-", Some(1))
            .await?;
        entries
            .into_iter()
            .next()
            .map(|(id, _)| parse_entry_id(&id))
            .transpose()
    }

    async fn open_reader(&self) -> StoreResult<Box<dyn TailReader>> {
        // Inherits the shared client's config and reconnect policy.
        let reader = self.client.clone_new();
        reader.init().await?;
        let reader_id: i64 = reader.client_id().await?;
        tracing::debug!(reader_id, "opened tail reader connection");
        Ok(Box::new(RedisTailReader {
            reader,
            control: self.client.clone(),
            reader_id: Some(reader_id),
        }))
    }
}

/// Blocking reader on a dedicated connection.
struct RedisTailReader {
    reader: Client,
    control: Client,
    /// Server-side id of `reader`; `None` after a failed read, since a
    /// reconnect assigns a new one.
    reader_id: Option<i64>,
}

#[async_trait]
impl TailReader for RedisTailReader {
    async fn read_after(&mut self, stream: &str, after: EntryId) -> StoreResult<Vec<RawEntry>> {
        require_non_empty("stream", stream)?;
        if self.reader_id.is_none() {
            let reader_id: i64 = self.reader.client_id().await?;
            tracing::debug!(reader_id, "tail reader reconnected");
            self.reader_id = Some(reader_id);
        }
        let response: HashMap<String, Vec<WireEntry>> = match self
            .reader
            .xread_map(None, Some(0), stream, after.to_string())
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.reader_id = None;
                return Err(e.into());
            }
        };
        let mut entries = response
            .into_values()
            .flatten()
            .map(raw_entry)
            .collect::<StoreResult<Vec<_>>>()?;
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    async fn close(self: Box<Self>) {
        // A reader cancelled mid-wait is still parked server-side; release
        // it from the shared connection before quitting.
        if let Some(reader_id) = self.reader_id {
            let unblocked: Result<i64, _> = self.control.client_unblock(reader_id, None).await;
            if let Err(e) = unblocked {
                tracing::warn!(reader_id, error = %e, "CLIENT UNBLOCK failed");
            }
        }
        match tokio::time::timeout(CLOSE_TIMEOUT, self.reader.quit()).await {
            Ok(Ok(())) => tracing::debug!(reader_id = ?self.reader_id, "closed tail reader"),
            Ok(Err(e)) => {
                tracing::warn!(reader_id = ?self.reader_id, error = %e, "tail reader QUIT failed");
            }
            Err(_elapsed) => {
                tracing::warn!(reader_id = ?self.reader_id, "tail reader QUIT timed out");
            }
        }
    }
}

fn parse_entry_id(id: &str) -> StoreResult<EntryId> {
    id.parse()
        .map_err(|e| StoreError::Config(format!("server returned an unparsable id: {e}")))
}

fn raw_entry((id, fields): WireEntry) -> StoreResult<RawEntry> {
    Ok(RawEntry {
        id: parse_entry_id(&id)?,
        fields: fields.into_iter().collect(),
    })
}
