//! Application log stream.
//!
//! Every saved record is stored at `{baseKey}:{id}:log` and appended to the
//! shared `{baseKey}` stream with its type as the event type, so a viewer
//! can follow one stream for everything.

use std::future::Future;

use serde_json::Value;
use streamhub_core::{Flow, Hub, ListenOptions, Subscription};
use streamhub_types::{EntryId, LogRecord, StreamEvent};

use crate::entity::EntityRepo;
use crate::error::RepoResult;

/// Default base key (and name of the shared log stream).
pub const LOG_BASE_KEY: &str = "logs";

/// Default queue key.
pub const LOG_QUEUE_KEY: &str = "logQueue";

/// Subkind under which each record is stored.
pub const LOG_SUBKIND: &str = "log";

/// Store access for log records.
#[derive(Debug, Clone)]
pub struct LogRepo {
    entity: EntityRepo,
}

impl LogRepo {
    /// Repository with the default `logs` / `logQueue` keys.
    pub fn new(hub: Hub) -> Self {
        Self::with_keys(hub, LOG_BASE_KEY, LOG_QUEUE_KEY)
    }

    /// Repository with explicit base and queue keys.
    pub fn with_keys(hub: Hub, base_key: &str, queue_key: &str) -> Self {
        Self {
            entity: EntityRepo::with_keys(hub, base_key, queue_key),
        }
    }

    /// Key naming for this repository.
    pub const fn entity(&self) -> &EntityRepo {
        &self.entity
    }

    /// Create an `info`-level record of type `log_type`, then save and
    /// publish it.
    pub async fn log(
        &self,
        log_type: &str,
        message: &str,
        data: Option<Value>,
    ) -> RepoResult<LogRecord> {
        let mut record = LogRecord::new(log_type, message);
        record.data = data;
        self.save_log(&record).await?;
        Ok(record)
    }

    /// Store `record` and publish it on the shared stream.
    pub async fn save_log(&self, record: &LogRecord) -> RepoResult<EntryId> {
        let key = self.entity.store_key(record.id.as_str(), LOG_SUBKIND)?;
        let hub = self.entity.hub();
        hub.set_val(&key, record).await?;
        let event_type = if record.log_type.is_empty() {
            LOG_SUBKIND
        } else {
            record.log_type.as_str()
        };
        Ok(hub.publish(self.entity.base_key(), event_type, record).await?)
    }

    /// Read a stored record.
    pub async fn load_log(&self, id: &str) -> RepoResult<Option<LogRecord>> {
        let key = self.entity.store_key(id, LOG_SUBKIND)?;
        Ok(self.entity.hub().get_val(&key).await?)
    }

    /// Publish an event about one record: on the record's own stream, and
    /// on the shared stream with a `logId` field added to object payloads.
    pub async fn publish_log(&self, id: &str, event_type: &str, data: Value) -> RepoResult<EntryId> {
        let stream = self.entity.events_key(id)?;
        let hub = self.entity.hub();
        hub.publish(&stream, event_type, &data).await?;
        let shared = match data {
            Value::Object(mut map) => {
                map.insert("logId".to_owned(), Value::from(id));
                Value::Object(map)
            }
            other => other,
        };
        Ok(hub.publish(self.entity.base_key(), event_type, &shared).await?)
    }

    /// Follow the shared stream from now on. Events whose payload is not a
    /// log record are skipped.
    pub async fn listen_to_log_stream<F, Fut>(&self, mut handler: F) -> RepoResult<Subscription>
    where
        F: FnMut(LogRecord) -> Fut + Send + 'static,
        Fut: Future<Output = Flow> + Send + 'static,
    {
        let forward = move |event: StreamEvent| {
            let next = serde_json::from_value::<LogRecord>(event.data)
                .map_err(|e| tracing::debug!(id = %event.id, error = %e, "not a log record"))
                .ok()
                .map(&mut handler);
            async move {
                match next {
                    Some(flow) => flow.await,
                    None => Flow::Continue,
                }
            }
        };
        Ok(self
            .entity
            .hub()
            .listen(
                self.entity.base_key(),
                forward,
                ListenOptions::latest().without_terminal_types(),
            )
            .await?)
    }

    /// Delete the queue stream.
    pub async fn clear_log_queue(&self) -> RepoResult<bool> {
        Ok(self.entity.hub().del_key(self.entity.queue_key()).await?)
    }
}
