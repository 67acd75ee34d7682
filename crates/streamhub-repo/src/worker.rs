//! Worker registry with periodic heartbeats.
//!
//! Each worker's [`WorkerInfo`] is a JSON value at
//! `{baseKey}:worker:{id}`. Listing scans that pattern under the hub
//! prefix.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use streamhub_core::Hub;
use streamhub_types::{WorkerId, WorkerInfo, WorkerStatus, now_millis};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::entity::{EntityRepo, entity_id};
use crate::error::{RepoError, RepoResult};

/// Default base key.
pub const WORKER_BASE_KEY: &str = "worker";

/// Heartbeat period used by [`Worker::start_heartbeat`] callers that have
/// no preference.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Store access for worker registrations.
#[derive(Debug, Clone)]
pub struct WorkerRepo {
    entity: EntityRepo,
}

impl WorkerRepo {
    /// Repository with the default `worker` base key.
    pub fn new(hub: Hub) -> Self {
        Self::with_base_key(hub, WORKER_BASE_KEY)
    }

    /// Repository with an explicit base key.
    pub fn with_base_key(hub: Hub, base_key: &str) -> Self {
        Self {
            entity: EntityRepo::with_keys(hub, base_key, crate::entity::DEFAULT_QUEUE_KEY),
        }
    }

    /// `{baseKey}:worker:{id}`.
    pub fn worker_key(&self, id: &str) -> RepoResult<String> {
        let id = entity_id(id)?;
        Ok(format!("{}:worker:{id}", self.entity.base_key()))
    }

    /// Store `info`, replacing any previous registration.
    pub async fn save_worker(&self, info: &WorkerInfo) -> RepoResult<()> {
        let key = self.worker_key(info.id.as_str())?;
        self.entity.hub().set_val(&key, info).await?;
        tracing::trace!(%key, status = ?info.status, "saved worker");
        Ok(())
    }

    /// Read one registration.
    pub async fn get_worker(&self, id: &str) -> RepoResult<Option<WorkerInfo>> {
        let key = self.worker_key(id)?;
        Ok(self.entity.hub().get_val(&key).await?)
    }

    async fn update(&self, id: &str, apply: impl FnOnce(&mut WorkerInfo)) -> RepoResult<WorkerInfo> {
        let mut info = self
            .get_worker(id)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("worker {id}")))?;
        apply(&mut info);
        info.last_seen = now_millis();
        self.save_worker(&info).await?;
        Ok(info)
    }

    /// Change a registered worker's status and refresh `lastSeen`.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::NotFound`] if the worker is not registered.
    pub async fn set_status(&self, id: &str, status: WorkerStatus) -> RepoResult<WorkerInfo> {
        self.update(id, |info| info.status = status).await
    }

    /// Refresh a registered worker's `lastSeen`.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::NotFound`] if the worker is not registered.
    pub async fn heartbeat(&self, id: &str) -> RepoResult<WorkerInfo> {
        self.update(id, |_| {}).await
    }

    /// Every registration under this repository's base key.
    pub async fn list_workers(&self) -> RepoResult<Vec<WorkerInfo>> {
        let hub = self.entity.hub();
        let pattern = format!("{}:worker:*", self.entity.base_key());
        let raw = hub.unprefixed();
        let mut workers = Vec::new();
        for key in hub.get_keys(&pattern).await? {
            match raw.get_val::<WorkerInfo>(&key).await {
                Ok(Some(info)) => workers.push(info),
                Ok(None) => {}
                Err(e) => tracing::warn!(%key, error = %e, "skipping unreadable worker entry"),
            }
        }
        workers.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(workers)
    }

    /// [`WorkerRepo::list_workers`] wrapped as [`Worker`] handles.
    pub async fn get_all_workers(&self) -> RepoResult<Vec<Worker>> {
        Ok(self
            .list_workers()
            .await?
            .into_iter()
            .map(|info| Worker::new(info, self.clone()))
            .collect())
    }
}

// =============================================================================
// Worker handle
// =============================================================================

/// Background task refreshing one worker's `lastSeen`.
#[derive(Debug)]
struct Heartbeat {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// A worker's registration plus an optional heartbeat task.
///
/// The handle and its heartbeat task share one [`WorkerInfo`]; every write
/// updates it under the lock and saves it before releasing, so a status
/// change is never overwritten by a heartbeat carrying the old status.
/// Dropping the handle stops the heartbeat.
#[derive(Debug)]
pub struct Worker {
    id: WorkerId,
    info: Arc<Mutex<WorkerInfo>>,
    repo: WorkerRepo,
    heartbeat: Option<Heartbeat>,
}

impl Worker {
    /// Wrap an existing registration.
    pub fn new(info: WorkerInfo, repo: WorkerRepo) -> Self {
        Self {
            id: info.id.clone(),
            info: Arc::new(Mutex::new(info)),
            repo,
            heartbeat: None,
        }
    }

    /// Register a new idle worker with a generated id.
    pub async fn register(repo: WorkerRepo, name: &str) -> RepoResult<Self> {
        let info = WorkerInfo {
            id: WorkerId::generate(),
            name: name.to_owned(),
            status: WorkerStatus::Idle,
            last_seen: now_millis(),
            meta: BTreeMap::new(),
        };
        repo.save_worker(&info).await?;
        tracing::info!(worker = %info.id, name, "worker registered");
        Ok(Self::new(info, repo))
    }

    /// Worker id.
    pub const fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Snapshot of the local registration.
    pub async fn info(&self) -> WorkerInfo {
        self.info.lock().await.clone()
    }

    /// The repository this worker is stored in.
    pub const fn repo(&self) -> &WorkerRepo {
        &self.repo
    }

    /// Store the local registration.
    pub async fn save(&self) -> RepoResult<()> {
        let info = self.info.lock().await;
        self.repo.save_worker(&info).await
    }

    /// Change status, refresh `lastSeen` and save.
    pub async fn set_status(&self, status: WorkerStatus) -> RepoResult<()> {
        touch(&self.repo, &self.info, |info| info.status = status).await
    }

    /// Refresh `lastSeen` and save.
    pub async fn heartbeat(&self) -> RepoResult<()> {
        touch(&self.repo, &self.info, |_| {}).await
    }

    /// Whether a heartbeat task is running.
    pub fn is_beating(&self) -> bool {
        self.heartbeat
            .as_ref()
            .is_some_and(|beat| !beat.task.is_finished())
    }

    /// Refresh `lastSeen` in the store every `interval` until stopped.
    /// Replaces a running heartbeat.
    pub async fn start_heartbeat(&mut self, interval: Duration) {
        self.stop_heartbeat().await;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let repo = self.repo.clone();
        let info = Arc::clone(&self.info);
        let id = self.id.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(e) = touch(&repo, &info, |_| {}).await {
                    tracing::warn!(worker = %id, error = %e, "heartbeat failed");
                }
            }
            tracing::debug!(worker = %id, "heartbeat stopped");
        });
        self.heartbeat = Some(Heartbeat { cancel, task });
    }

    /// Stop the heartbeat task and wait for it to exit.
    pub async fn stop_heartbeat(&mut self) {
        if let Some(beat) = self.heartbeat.take() {
            beat.cancel.cancel();
            if let Err(e) = beat.task.await {
                tracing::warn!(worker = %self.id, error = %e, "heartbeat task failed");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(beat) = &self.heartbeat {
            beat.cancel.cancel();
        }
    }
}

/// Apply `change`, refresh `lastSeen` and save, all under the lock.
async fn touch(
    repo: &WorkerRepo,
    info: &Mutex<WorkerInfo>,
    change: impl FnOnce(&mut WorkerInfo),
) -> RepoResult<()> {
    let mut info = info.lock().await;
    change(&mut info);
    info.last_seen = now_millis();
    repo.save_worker(&info).await
}
