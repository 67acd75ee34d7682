//! Action requests: persisted work items with a stream event trail.
//!
//! An action lives under `{baseKey}:{id}:*`:
//!
//! ```text
//! {baseKey}:{id}:action   JSON snapshot (record + events), written by save
//! {baseKey}:{id}:status   \
//! {baseKey}:{id}:data      | individual fields, written by the setters
//! {baseKey}:{id}:error     | and read back by restore_all
//! {baseKey}:{id}:output   /
//! {baseKey}:{id}:events   event stream (request, data, completed, ...)
//! {queueKey}              shared request queue, one "action" event per start
//! ```
//!
//! The snapshot and the field keys are written by separate calls and can
//! disagree for a moment; [`ActionRequest::restore_all`] prefers the field
//! keys.

use std::future::Future;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use streamhub_core::{EventHandler, Flow, Hub, ListenOptions, Subscription};
use streamhub_types::{
    ActionId, ActionRecord, ActionSnapshot, ActionStatus, EntryId, StreamEvent, StreamRange,
};

use crate::entity::{DEFAULT_BASE_KEY, DEFAULT_QUEUE_KEY, EntityRepo};
use crate::error::RepoResult;

/// Subkind of the JSON snapshot key.
pub const SNAPSHOT_SUBKIND: &str = "action";

/// Event type of request queue entries.
pub const QUEUE_EVENT_TYPE: &str = "action";

/// Event types that mark the end of an action's trail.
pub const FINISHED_EVENT_TYPES: [&str; 3] = ["completed", "failed", "cancelled"];

/// Body of every lifecycle event on an action's stream.
#[derive(Serialize)]
struct Notice<'a> {
    action: &'a ActionRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

impl<'a> Notice<'a> {
    const fn of(action: &'a ActionRecord) -> Self {
        Self {
            action,
            data: None,
            output: None,
            error: None,
            reason: None,
        }
    }
}

/// Borrowed form of [`ActionSnapshot`] for saving without cloning.
#[derive(Serialize)]
struct SnapshotRef<'a> {
    #[serde(flatten)]
    record: &'a ActionRecord,
    events: &'a [StreamEvent],
}

// =============================================================================
// Repository
// =============================================================================

/// Store access for action requests.
#[derive(Debug, Clone)]
pub struct ActionRepo {
    entity: EntityRepo,
}

impl ActionRepo {
    /// Repository with the default `entities` / `entityQueue` keys.
    pub fn new(hub: Hub) -> Self {
        Self::with_keys(hub, DEFAULT_BASE_KEY, DEFAULT_QUEUE_KEY)
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

    /// Listen options that replay an action's whole trail and end on its
    /// first `completed`, `failed` or `cancelled` event.
    pub fn until_finished() -> ListenOptions {
        ListenOptions::after(EntryId::ZERO).terminal_types(FINISHED_EVENT_TYPES)
    }

    /// A new pending action. Nothing is written until it is saved or
    /// started.
    pub fn create(&self, name: impl Into<String>, arg: Value) -> ActionRequest {
        self.attach(ActionRecord::new(name, arg), Vec::new())
    }

    /// Wrap an existing record (for example one taken off the request
    /// queue).
    pub fn attach(&self, record: ActionRecord, events: Vec<StreamEvent>) -> ActionRequest {
        ActionRequest {
            repo: self.clone(),
            record,
            events,
        }
    }

    /// Load a saved action. With `restore`, every field is then re-read
    /// from its own key.
    pub async fn load_action(&self, id: &str, restore: bool) -> RepoResult<Option<ActionRequest>> {
        let key = self.entity.store_key(id, SNAPSHOT_SUBKIND)?;
        let Some(raw) = self.entity.hub().get_raw_val(&key).await? else {
            tracing::debug!(%key, "action not found");
            return Ok(None);
        };
        let snapshot: ActionSnapshot = serde_json::from_str(&raw)?;
        let mut action = self.attach(snapshot.record, snapshot.events);
        if restore {
            action.restore_all().await?;
        }
        Ok(Some(action))
    }

    /// Write the snapshot of `action`.
    pub async fn save_action(&self, action: &ActionRequest) -> RepoResult<()> {
        let key = self.entity.store_key(action.id().as_str(), SNAPSHOT_SUBKIND)?;
        let snapshot = SnapshotRef {
            record: &action.record,
            events: &action.events,
        };
        self.entity.hub().set_val(&key, &snapshot).await?;
        tracing::debug!(%key, status = ?action.record.status, "saved action");
        Ok(())
    }

    /// Append an event to the action's trail.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        id: &str,
        event_type: &str,
        data: &T,
    ) -> RepoResult<EntryId> {
        let stream = self.entity.events_key(id)?;
        Ok(self.entity.hub().publish(&stream, event_type, data).await?)
    }

    /// Announce `record` on the shared request queue.
    pub async fn publish_to_request_queue(&self, record: &ActionRecord) -> RepoResult<EntryId> {
        crate::entity::entity_id(record.id.as_str())?;
        let id = self
            .entity
            .hub()
            .publish(self.entity.queue_key(), QUEUE_EVENT_TYPE, record)
            .await?;
        tracing::debug!(queue = self.entity.queue_key(), action = %record.id, "queued action");
        Ok(id)
    }

    /// Follow the request queue from now on. Entries that are not action
    /// records are skipped.
    pub async fn listen_to_request_queue<F, Fut>(&self, mut handler: F) -> RepoResult<Subscription>
    where
        F: FnMut(ActionRecord) -> Fut + Send + 'static,
        Fut: Future<Output = Flow> + Send + 'static,
    {
        let queue = self.entity.queue_key().to_owned();
        let forward = move |event: StreamEvent| {
            let next = match serde_json::from_value::<ActionRecord>(event.data) {
                Ok(record) => Some(handler(record)),
                Err(e) => {
                    tracing::warn!(%queue, id = %event.id, error = %e, "skipping malformed queue entry");
                    None
                }
            };
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
                self.entity.queue_key(),
                forward,
                ListenOptions::latest().without_terminal_types(),
            )
            .await?)
    }

    /// Delete the request queue stream.
    pub async fn clear_request_queue(&self) -> RepoResult<bool> {
        Ok(self.entity.hub().del_key(self.entity.queue_key()).await?)
    }

    /// Subscribe to the action's trail.
    pub async fn listen<H: EventHandler>(
        &self,
        id: &str,
        handler: H,
        options: ListenOptions,
    ) -> RepoResult<Subscription> {
        let stream = self.entity.events_key(id)?;
        Ok(self.entity.hub().listen(&stream, handler, options).await?)
    }

    /// Every event on the action's trail so far.
    pub async fn events(&self, id: &str) -> RepoResult<Vec<StreamEvent>> {
        let stream = self.entity.events_key(id)?;
        Ok(self
            .entity
            .hub()
            .get_stream_values(&stream, &StreamRange::all())
            .await?)
    }

    /// Read one field of an action.
    pub async fn get_val<T: DeserializeOwned>(&self, id: &str, subkind: &str) -> RepoResult<Option<T>> {
        let key = self.entity.store_key(id, subkind)?;
        Ok(self.entity.hub().get_val(&key).await?)
    }

    /// Write one field of an action.
    pub async fn set_val<T: Serialize + ?Sized>(
        &self,
        id: &str,
        subkind: &str,
        value: &T,
    ) -> RepoResult<()> {
        let key = self.entity.store_key(id, subkind)?;
        Ok(self.entity.hub().set_val(&key, value).await?)
    }

    /// Remove one field of an action.
    pub async fn del_val(&self, id: &str, subkind: &str) -> RepoResult<bool> {
        let key = self.entity.store_key(id, subkind)?;
        Ok(self.entity.hub().del_key(&key).await?)
    }
}

// =============================================================================
// Request
// =============================================================================

/// One action plus the repository it is stored in.
///
/// Getters named `get_*` read the store and refresh the local copy;
/// the plain accessors return the local copy.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    repo: ActionRepo,
    record: ActionRecord,
    events: Vec<StreamEvent>,
}

impl ActionRequest {
    /// Action id.
    pub const fn id(&self) -> &ActionId {
        &self.record.id
    }

    /// Local copy of the record.
    pub const fn record(&self) -> &ActionRecord {
        &self.record
    }

    /// Events carried in the snapshot.
    pub fn events(&self) -> &[StreamEvent] {
        &self.events
    }

    /// Local status.
    pub const fn status(&self) -> ActionStatus {
        self.record.status
    }

    /// Owned snapshot of record and events.
    pub fn snapshot(&self) -> ActionSnapshot {
        ActionSnapshot {
            record: self.record.clone(),
            events: self.events.clone(),
        }
    }

    /// Append an event to this action's trail.
    pub async fn publish<T: Serialize + ?Sized>(&self, event_type: &str, data: &T) -> RepoResult<EntryId> {
        self.repo.publish(self.record.id.as_str(), event_type, data).await
    }

    /// Announce this action on the request queue.
    pub async fn publish_to_request_queue(&self) -> RepoResult<EntryId> {
        self.repo.publish_to_request_queue(&self.record).await
    }

    /// Subscribe to this action's trail.
    pub async fn listen<H: EventHandler>(
        &self,
        handler: H,
        options: ListenOptions,
    ) -> RepoResult<Subscription> {
        self.repo.listen(self.record.id.as_str(), handler, options).await
    }

    /// Replace the local event list with the stored trail.
    pub async fn refresh_events(&mut self) -> RepoResult<&[StreamEvent]> {
        self.events = self.repo.events(self.record.id.as_str()).await?;
        Ok(&self.events)
    }

    // -------------------------------------------------------------------------
    // Field access
    // -------------------------------------------------------------------------

    /// Stored status, kept locally if the key is missing.
    pub async fn get_status(&mut self) -> RepoResult<ActionStatus> {
        if let Some(status) = self.repo.get_val(self.record.id.as_str(), "status").await? {
            self.record.status = status;
        }
        Ok(self.record.status)
    }

    /// Stored progress data, kept locally if the key is missing.
    pub async fn get_data(&mut self) -> RepoResult<Value> {
        if let Some(data) = self.repo.get_val(self.record.id.as_str(), "data").await? {
            self.record.data = data;
        }
        Ok(self.record.data.clone())
    }

    /// Stored error; a missing key clears the local copy.
    pub async fn get_error(&mut self) -> RepoResult<Option<Value>> {
        self.record.error = self.repo.get_val(self.record.id.as_str(), "error").await?;
        Ok(self.record.error.clone())
    }

    /// Stored output; a missing key clears the local copy.
    pub async fn get_output(&mut self) -> RepoResult<Option<Value>> {
        self.record.output = self.repo.get_val(self.record.id.as_str(), "output").await?;
        Ok(self.record.output.clone())
    }

    /// Set and store the status.
    pub async fn set_status(&mut self, status: ActionStatus) -> RepoResult<()> {
        self.record.status = status;
        self.repo.set_val(self.record.id.as_str(), "status", &status).await
    }

    /// Set and store progress data; with `notify`, also publish a `data`
    /// event.
    pub async fn set_data(&mut self, data: Value, notify: bool) -> RepoResult<()> {
        self.record.data = data;
        self.repo
            .set_val(self.record.id.as_str(), "data", &self.record.data)
            .await?;
        if notify {
            let notice = Notice {
                data: Some(&self.record.data),
                ..Notice::of(&self.record)
            };
            self.publish("data", &notice).await?;
        }
        Ok(())
    }

    /// Set and store the output; `None` removes the key.
    pub async fn set_output(&mut self, output: Option<Value>) -> RepoResult<()> {
        self.record.output = output;
        self.store_optional("output", self.record.output.as_ref()).await
    }

    /// Set and store the error; `None` removes the key.
    pub async fn set_error(&mut self, error: Option<Value>) -> RepoResult<()> {
        self.record.error = error;
        self.store_optional("error", self.record.error.as_ref()).await
    }

    async fn store_optional(&self, subkind: &str, value: Option<&Value>) -> RepoResult<()> {
        let id = self.record.id.as_str();
        match value {
            Some(value) => self.repo.set_val(id, subkind, value).await,
            None => self.repo.del_val(id, subkind).await.map(|_| ()),
        }
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    /// Write the snapshot.
    pub async fn save(&self) -> RepoResult<()> {
        self.repo.save_action(self).await
    }

    /// Write the snapshot and every field key.
    pub async fn save_all(&mut self) -> RepoResult<()> {
        self.save().await?;
        self.set_status(self.record.status).await?;
        self.set_data(self.record.data.clone(), false).await?;
        self.set_output(self.record.output.clone()).await?;
        self.set_error(self.record.error.clone()).await
    }

    /// Re-read status, data, error and output from their own keys.
    pub async fn restore_all(&mut self) -> RepoResult<()> {
        self.get_status().await?;
        self.get_data().await?;
        self.get_error().await?;
        self.get_output().await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Mark running, save, publish `request` and queue the action.
    ///
    /// The steps are separate writes; a failure part way leaves the
    /// earlier ones in place.
    pub async fn start(&mut self) -> RepoResult<()> {
        self.record.status = ActionStatus::Running;
        self.save().await?;
        self.publish("request", &Notice::of(&self.record)).await?;
        self.publish_to_request_queue().await?;
        tracing::info!(action = %self.record.id, name = %self.record.name, "action started");
        Ok(())
    }

    /// Mark completed and publish `completed` with the output.
    pub async fn complete(&mut self, output: Value) -> RepoResult<()> {
        self.set_status(ActionStatus::Completed).await?;
        let notice = Notice {
            output: Some(&output),
            ..Notice::of(&self.record)
        };
        self.publish("completed", &notice).await?;
        tracing::info!(action = %self.record.id, "action completed");
        Ok(())
    }

    /// Mark failed, store the error and publish `failed`.
    pub async fn fail(&mut self, error: Value) -> RepoResult<()> {
        self.set_status(ActionStatus::Failed).await?;
        self.set_error(Some(error)).await?;
        let notice = Notice {
            error: self.record.error.as_ref(),
            ..Notice::of(&self.record)
        };
        self.publish("failed", &notice).await?;
        tracing::warn!(action = %self.record.id, "action failed");
        Ok(())
    }

    /// Mark cancelled, store `{message: reason}` as the error and publish
    /// `cancelled`.
    pub async fn cancel(&mut self, reason: &str) -> RepoResult<()> {
        self.set_status(ActionStatus::Cancelled).await?;
        let mut message = serde_json::Map::new();
        message.insert("message".to_owned(), Value::from(reason));
        self.set_error(Some(Value::Object(message))).await?;
        let notice = Notice {
            reason: Some(reason),
            ..Notice::of(&self.record)
        };
        self.publish("cancelled", &notice).await?;
        tracing::info!(action = %self.record.id, reason, "action cancelled");
        Ok(())
    }
}
