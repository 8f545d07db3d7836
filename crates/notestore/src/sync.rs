//! # Sync Scheduler
//!
//! Replicated storages sync with their remote in the background. Each
//! registered storage gets its own tokio task:
//!
//! ```text
//!            change ──► re-arm: sleep(debounce)
//!              │
//!   ┌──────────┴───────────┐
//!   │ select! {            │
//!   │   change channel     │ ──► wait = debounce
//!   │   sleep(wait)        │ ──► sync, then wait = interval
//!   │ }                    │
//!   └──────────────────────┘
//! ```
//!
//! Every local change pushes the next sync to `debounce` after the *last*
//! change. With no changes the task syncs every `interval`.
//!
//! ## States
//!
//! `Idle → Syncing → Idle` on success, `Idle → Syncing → Error(class) → Idle`
//! on failure. The current [`SyncStatus`] is observable through a `watch`
//! receiver; every transition is also broadcast as a [`SyncEvent`].
//!
//! - At most one sync runs per storage. A request while one is in flight
//!   returns [`SyncOutcome::AlreadySyncing`] without doing anything.
//! - Success stamps `cloudStorage.syncedAt` in the metadata store.
//! - Quota and gone-remote failures unlink the storage: the remote is
//!   dropped, the metadata link cleared and the task stops.
//! - Other failures are reported and the timer re-arms.
//!
//! `unregister` and dropping the scheduler abort the tasks. A sync started by
//! `sync_now` runs in its own task, so a caller that stops waiting does not
//! cut it short.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::NotesConfig;
use crate::error::{Result, SyncError, SyncErrorClass};
use crate::meta::MetaStore;
use crate::storage::NoteStorage;
use crate::store::backend::DocBackend;
use crate::store::docdb::{RemoteDocDb, SyncReport};
use crate::store::{NoteStore, ReplicatedBackend};

type SyncResult<T> = std::result::Result<T, SyncError>;

/// The replication handle of a replicated backend.
#[async_trait]
pub trait Replica: Send + Sync {
    async fn sync(&self) -> SyncResult<SyncReport>;
    async fn link(&self, remote: Arc<dyn RemoteDocDb>);
    async fn unlink(&self);
    async fn is_linked(&self) -> bool;
    /// Release the local database. Later calls on the backend fail.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
impl Replica for ReplicatedBackend {
    async fn sync(&self) -> SyncResult<SyncReport> {
        ReplicatedBackend::sync(self).await
    }

    async fn link(&self, remote: Arc<dyn RemoteDocDb>) {
        ReplicatedBackend::link(self, remote).await
    }

    async fn unlink(&self) {
        ReplicatedBackend::unlink(self).await
    }

    async fn is_linked(&self) -> bool {
        ReplicatedBackend::is_linked(self).await
    }

    async fn close(&self) -> Result<()> {
        ReplicatedBackend::close(self).await
    }
}

#[async_trait]
impl<B> Replica for NoteStore<B>
where
    B: DocBackend + Replica,
{
    async fn sync(&self) -> SyncResult<SyncReport> {
        self.backend().sync().await
    }

    async fn link(&self, remote: Arc<dyn RemoteDocDb>) {
        self.backend().link(remote).await
    }

    async fn unlink(&self) {
        self.backend().unlink().await
    }

    async fn is_linked(&self) -> bool {
        self.backend().is_linked().await
    }

    async fn close(&self) -> Result<()> {
        self.backend().close().await
    }
}

/// What the scheduler drives.
#[async_trait]
pub trait SyncTarget: Send + Sync {
    async fn sync(&self) -> SyncResult<SyncReport>;
    async fn unlink(&self);
    async fn is_linked(&self) -> bool;
}

/// Syncing a storage holds its write lock, so no command runs mid-replication.
/// When documents were pulled the index is rebuilt from canonical data.
#[async_trait]
impl SyncTarget for NoteStorage {
    async fn sync(&self) -> SyncResult<SyncReport> {
        let replica = self
            .replica()
            .ok_or_else(|| SyncError::Local(format!("storage '{}' does not replicate", self.id())))?;

        let _guard = self.lock().await;
        let result = replica.sync().await;
        // conflicting docs are resolved and stored before the error is raised
        let pulled = match &result {
            Ok(report) => report.pulled > 0,
            Err(SyncError::Conflict(_)) => true,
            Err(_) => false,
        };
        if pulled {
            let rebuilt = self
                .rebuild()
                .await
                .map_err(|e| SyncError::Local(e.to_string()))?;
            self.publish(rebuilt);
            debug!(storage = %self.id(), "Rebuilt index after pull");
        }
        result
    }

    async fn unlink(&self) {
        if let Some(replica) = self.replica() {
            replica.unlink().await;
        }
    }

    async fn is_linked(&self) -> bool {
        match self.replica() {
            Some(replica) => replica.is_linked().await,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Delay after the last local change.
    pub debounce: Duration,
    /// Delay between syncs when nothing changes.
    pub interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(30),
            interval: Duration::from_secs(600),
        }
    }
}

impl From<&NotesConfig> for SyncConfig {
    fn from(config: &NotesConfig) -> Self {
        Self {
            debounce: Duration::from_secs(config.sync_debounce_secs),
            interval: Duration::from_secs(config.sync_interval_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing,
    Error(SyncErrorClass),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    pub state: SyncState,
    pub synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<SyncError>,
    pub linked: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Started {
        storage_id: String,
    },
    Completed {
        storage_id: String,
        report: SyncReport,
        synced_at: DateTime<Utc>,
    },
    Failed {
        storage_id: String,
        error: SyncError,
        /// Text for the person using the app.
        message: String,
        unlinked: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    AlreadySyncing,
}

type Registry = Mutex<HashMap<String, Registration>>;

struct Worker {
    storage_id: String,
    target: Arc<dyn SyncTarget>,
    meta: Arc<MetaStore>,
    events: broadcast::Sender<SyncEvent>,
    status: watch::Sender<SyncStatus>,
    in_flight: AtomicBool,
    registry: Weak<Registry>,
}

/// Marks a sync in flight until dropped, whether the sync finished or its
/// task was aborted.
struct InFlight<'a>(&'a Worker);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.status.send_if_modified(|s| {
            let syncing = s.state == SyncState::Syncing;
            if syncing {
                s.state = SyncState::Idle;
            }
            syncing
        });
        self.0.in_flight.store(false, Ordering::Release);
    }
}

impl Worker {
    async fn sync_once(self: &Arc<Self>) -> SyncResult<SyncOutcome> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!(storage = %self.storage_id, "Sync already in flight");
            return Ok(SyncOutcome::AlreadySyncing);
        }
        let _in_flight = InFlight(self);

        self.status.send_modify(|s| s.state = SyncState::Syncing);
        let _ = self.events.send(SyncEvent::Started {
            storage_id: self.storage_id.clone(),
        });
        debug!(storage = %self.storage_id, "Sync started");

        match self.target.sync().await {
            Ok(report) => {
                self.completed(report).await;
                Ok(SyncOutcome::Completed(report))
            }
            Err(error) => {
                if self.failed(error.clone()).await {
                    self.retire();
                }
                Err(error)
            }
        }
    }

    /// Drop this worker's registration and stop its timer task. A newer
    /// registration under the same id is left alone.
    fn retire(self: &Arc<Self>) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut entries = registry.lock();
        if entries
            .get(&self.storage_id)
            .is_some_and(|e| Arc::ptr_eq(&e.worker, self))
        {
            if let Some(entry) = entries.remove(&self.storage_id) {
                entry.task.abort();
            }
            info!(storage = %self.storage_id, "Unregistered from sync after unlink");
        }
    }

    async fn completed(&self, report: SyncReport) {
        let now = Utc::now();
        if let Err(e) = self.meta.stamp_synced(&self.storage_id, now).await {
            warn!(storage = %self.storage_id, error = %e, "Could not record sync time");
        }
        self.status.send_modify(|s| {
            s.state = SyncState::Idle;
            s.synced_at = Some(now);
            s.last_error = None;
        });
        let _ = self.events.send(SyncEvent::Completed {
            storage_id: self.storage_id.clone(),
            report,
            synced_at: now,
        });
        info!(
            storage = %self.storage_id,
            pulled = report.pulled,
            pushed = report.pushed,
            "Sync completed"
        );
    }

    /// Returns true when the failure unlinked the storage.
    async fn failed(&self, error: SyncError) -> bool {
        let class = error.class();
        self.status.send_modify(|s| {
            s.state = SyncState::Error(class);
            s.last_error = Some(error.clone());
        });

        let unlinked = class.unlinks();
        if unlinked {
            self.target.unlink().await;
            if let Err(e) = self.meta.unlink_cloud(&self.storage_id).await {
                warn!(storage = %self.storage_id, error = %e, "Could not clear cloud link");
            }
        }
        warn!(
            storage = %self.storage_id,
            error = %error,
            class = ?class,
            unlinked,
            "Sync failed"
        );

        self.status.send_modify(|s| {
            s.state = SyncState::Idle;
            if unlinked {
                s.linked = false;
            }
        });
        let _ = self.events.send(SyncEvent::Failed {
            storage_id: self.storage_id.clone(),
            message: error.user_message(),
            error,
            unlinked,
        });
        unlinked
    }
}

async fn run_loop(worker: Arc<Worker>, mut changes: mpsc::Receiver<()>, config: SyncConfig) {
    let mut wait = config.interval;
    loop {
        tokio::select! {
            change = changes.recv() => {
                if change.is_none() {
                    break;
                }
                wait = config.debounce;
            }
            _ = tokio::time::sleep(wait) => {
                wait = config.interval;
                if !worker.target.is_linked().await {
                    debug!(storage = %worker.storage_id, "Not linked, skipping sync");
                    continue;
                }
                if let Err(e) = worker.sync_once().await {
                    if e.class().unlinks() {
                        break;
                    }
                }
            }
        }
    }
    debug!(storage = %worker.storage_id, "Sync task stopped");
}

struct Registration {
    worker: Arc<Worker>,
    changes: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

pub struct SyncScheduler {
    config: SyncConfig,
    meta: Arc<MetaStore>,
    events: broadcast::Sender<SyncEvent>,
    entries: Arc<Registry>,
}

impl SyncScheduler {
    pub fn new(config: SyncConfig, meta: Arc<MetaStore>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            config,
            meta,
            events,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> SyncConfig {
        self.config
    }

    /// Start the background task for a storage, replacing any previous one.
    pub async fn register(
        &self,
        storage_id: &str,
        target: Arc<dyn SyncTarget>,
    ) -> watch::Receiver<SyncStatus> {
        let synced_at = self
            .meta
            .get(storage_id)
            .await
            .and_then(|m| m.cloud_storage)
            .and_then(|c| c.synced_at);
        let (status, rx) = watch::channel(SyncStatus {
            state: SyncState::Idle,
            synced_at,
            last_error: None,
            linked: target.is_linked().await,
        });

        let worker = Arc::new(Worker {
            storage_id: storage_id.to_string(),
            target,
            meta: self.meta.clone(),
            events: self.events.clone(),
            status,
            in_flight: AtomicBool::new(false),
            registry: Arc::downgrade(&self.entries),
        });
        let (changes, changes_rx) = mpsc::channel(1);
        let task = tokio::spawn(run_loop(worker.clone(), changes_rx, self.config));

        let previous = self.entries.lock().insert(
            storage_id.to_string(),
            Registration {
                worker,
                changes,
                task,
            },
        );
        if let Some(previous) = previous {
            previous.task.abort();
        }
        info!(storage = %storage_id, "Registered for sync");
        rx
    }

    pub async fn unregister(&self, storage_id: &str) -> bool {
        match self.entries.lock().remove(storage_id) {
            Some(entry) => {
                entry.task.abort();
                info!(storage = %storage_id, "Unregistered from sync");
                true
            }
            None => false,
        }
    }

    pub async fn is_registered(&self, storage_id: &str) -> bool {
        self.entries
            .lock()
            .get(storage_id)
            .is_some_and(|e| !e.task.is_finished())
    }

    /// Re-arm the storage's debounce timer. Unregistered storages are ignored.
    pub async fn notify_change(&self, storage_id: &str) {
        let entries = self.entries.lock();
        let Some(entry) = entries.get(storage_id) else {
            return;
        };
        match entry.changes.try_send(()) {
            Ok(()) => debug!(storage = %storage_id, "Sync timer re-armed"),
            // a pending signal re-arms the timer anyway
            Err(mpsc::error::TrySendError::Full(_)) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(storage = %storage_id, "Sync task has stopped, change ignored")
            }
        }
    }

    /// Sync right away, outside the timer. The sync runs to completion even
    /// if the returned future is dropped.
    pub async fn sync_now(&self, storage_id: &str) -> SyncResult<SyncOutcome> {
        let worker = self
            .entries
            .lock()
            .get(storage_id)
            .map(|e| e.worker.clone())
            .ok_or_else(|| {
                SyncError::Local(format!("storage '{}' is not registered for sync", storage_id))
            })?;

        tokio::spawn(async move { worker.sync_once().await })
            .await
            .map_err(|e| SyncError::Local(format!("sync task failed: {}", e)))?
    }

    pub async fn status(&self, storage_id: &str) -> Option<watch::Receiver<SyncStatus>> {
        self.entries
            .lock()
            .get(storage_id)
            .map(|e| e.worker.status.subscribe())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        for entry in self.entries.lock().values() {
            entry.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{CloudStorageLink, StorageMeta};
    use crate::model::BackendKind;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    /// Replays scripted results; succeeds once the script runs out.
    struct Scripted {
        results: std::sync::Mutex<VecDeque<SyncResult<SyncReport>>>,
        calls: AtomicUsize,
        linked: AtomicBool,
        delay: Duration,
    }

    impl Scripted {
        fn new(results: Vec<SyncResult<SyncReport>>) -> Arc<Self> {
            Arc::new(Self {
                results: std::sync::Mutex::new(results.into()),
                calls: AtomicUsize::new(0),
                linked: AtomicBool::new(true),
                delay: Duration::ZERO,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SyncTarget for Scripted {
        async fn sync(&self) -> SyncResult<SyncReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(SyncReport::default()))
        }

        async fn unlink(&self) {
            self.linked.store(false, Ordering::SeqCst);
        }

        async fn is_linked(&self) -> bool {
            self.linked.load(Ordering::SeqCst)
        }
    }

    async fn linked_meta(id: &str) -> Arc<MetaStore> {
        let meta = MetaStore::in_memory();
        meta.add(StorageMeta {
            id: id.to_string(),
            name: id.to_string(),
            kind: BackendKind::Replicated,
            location: None,
            cloud_storage: Some(CloudStorageLink::default()),
        })
        .await
        .unwrap();
        Arc::new(meta)
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_syncs_after_debounce() {
        let meta = linked_meta("s").await;
        let scheduler = SyncScheduler::new(SyncConfig::default(), meta.clone());
        let target = Scripted::new(vec![]);
        let mut events = scheduler.subscribe();
        scheduler.register("s", target.clone()).await;

        let start = tokio::time::Instant::now();
        scheduler.notify_change("s").await;

        assert!(matches!(events.recv().await.unwrap(), SyncEvent::Started { .. }));
        assert!(matches!(events.recv().await.unwrap(), SyncEvent::Completed { .. }));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(30), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(600), "{:?}", elapsed);
        assert_eq!(target.calls(), 1);

        let link = meta.get("s").await.unwrap().cloud_storage.unwrap();
        assert!(link.synced_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_changes_push_the_sync_back() {
        let scheduler = SyncScheduler::new(SyncConfig::default(), linked_meta("s").await);
        let target = Scripted::new(vec![]);
        let mut events = scheduler.subscribe();
        scheduler.register("s", target.clone()).await;

        let start = tokio::time::Instant::now();
        scheduler.notify_change("s").await;
        tokio::time::sleep(Duration::from_secs(20)).await;
        scheduler.notify_change("s").await;
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(target.calls(), 0);

        assert!(matches!(events.recv().await.unwrap(), SyncEvent::Started { .. }));
        assert!(start.elapsed() >= Duration::from_secs(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_storage_syncs_on_interval() {
        let scheduler = SyncScheduler::new(SyncConfig::default(), linked_meta("s").await);
        let target = Scripted::new(vec![]);
        let mut events = scheduler.subscribe();
        scheduler.register("s", target.clone()).await;

        let start = tokio::time::Instant::now();
        events.recv().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_error_unlinks_and_stops() {
        let meta = linked_meta("s").await;
        let scheduler = SyncScheduler::new(SyncConfig::default(), meta.clone());
        let target = Scripted::new(vec![Err(SyncError::from_remote(Some(413), "too big"))]);
        let mut events = scheduler.subscribe();
        let mut status = scheduler.register("s", target.clone()).await;

        scheduler.notify_change("s").await;
        events.recv().await.unwrap();
        match events.recv().await.unwrap() {
            SyncEvent::Failed {
                unlinked, message, ..
            } => {
                assert!(unlinked);
                assert!(message.contains("full"));
            }
            other => panic!("unexpected event {:?}", other),
        }

        status.changed().await.ok();
        let current = status.borrow().clone();
        assert!(!current.linked);
        assert_eq!(current.state, SyncState::Idle);
        assert!(matches!(current.last_error, Some(SyncError::QuotaExceeded(_))));
        assert!(meta.get("s").await.unwrap().cloud_storage.is_none());

        // the registration is gone, so later changes never sync
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!scheduler.is_registered("s").await);
        assert!(scheduler.status("s").await.is_none());
        assert!(scheduler.entries.lock().is_empty());
        scheduler.notify_change("s").await;
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(target.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_keep_the_link_and_retry() {
        let scheduler = SyncScheduler::new(SyncConfig::default(), linked_meta("s").await);
        let target = Scripted::new(vec![Err(SyncError::from_remote(Some(500), "boom"))]);
        let mut events = scheduler.subscribe();
        scheduler.register("s", target.clone()).await;

        scheduler.notify_change("s").await;
        events.recv().await.unwrap();
        match events.recv().await.unwrap() {
            SyncEvent::Failed { unlinked, .. } => assert!(!unlinked),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(target.is_linked().await);

        // next attempt on the interval succeeds
        events.recv().await.unwrap();
        assert!(matches!(events.recv().await.unwrap(), SyncEvent::Completed { .. }));
        assert_eq!(target.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_sync_is_a_no_op() {
        let scheduler = Arc::new(SyncScheduler::new(
            SyncConfig::default(),
            linked_meta("s").await,
        ));
        let target = Arc::new(Scripted {
            results: std::sync::Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            linked: AtomicBool::new(true),
            delay: Duration::from_secs(10),
        });
        scheduler.register("s", target.clone()).await;

        let first = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.sync_now("s").await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        let second = scheduler.sync_now("s").await.unwrap();

        assert_eq!(second, SyncOutcome::AlreadySyncing);
        assert!(matches!(
            first.await.unwrap().unwrap(),
            SyncOutcome::Completed(_)
        ));
        assert_eq!(target.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_now_unlink_drops_the_registration() {
        let scheduler = SyncScheduler::new(SyncConfig::default(), linked_meta("s").await);
        let target = Scripted::new(vec![Err(SyncError::from_remote(Some(410), "gone"))]);
        scheduler.register("s", target.clone()).await;

        let err = scheduler.sync_now("s").await.unwrap_err();
        assert!(matches!(err, SyncError::RemoteGone(_)));
        assert!(scheduler.status("s").await.is_none());
        assert!(scheduler.sync_now("s").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_sync_now_does_not_wedge_the_storage() {
        let scheduler = SyncScheduler::new(SyncConfig::default(), linked_meta("s").await);
        let target = Arc::new(Scripted {
            results: std::sync::Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            linked: AtomicBool::new(true),
            delay: Duration::from_secs(10),
        });
        let status = scheduler.register("s", target.clone()).await;

        let abandoned =
            tokio::time::timeout(Duration::from_secs(1), scheduler.sync_now("s")).await;
        assert!(abandoned.is_err());

        // the first sync keeps running in its own task and finishes
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(status.borrow().state, SyncState::Idle);
        assert!(status.borrow().synced_at.is_some());

        let outcome = scheduler.sync_now("s").await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Completed(_)));
        assert_eq!(target.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_sync_releases_the_in_flight_flag() {
        let scheduler = SyncScheduler::new(SyncConfig::default(), linked_meta("s").await);
        let target = Arc::new(Scripted {
            results: std::sync::Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            linked: AtomicBool::new(true),
            delay: Duration::from_secs(10),
        });
        let status = scheduler.register("s", target.clone()).await;
        let worker = scheduler.entries.lock()["s"].worker.clone();

        let task = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.sync_once().await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(status.borrow().state, SyncState::Syncing);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(!worker.in_flight.load(Ordering::Acquire));
        assert_eq!(status.borrow().state, SyncState::Idle);

        assert!(matches!(
            scheduler.sync_now("s").await.unwrap(),
            SyncOutcome::Completed(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_cancels_the_timer() {
        let scheduler = SyncScheduler::new(SyncConfig::default(), linked_meta("s").await);
        let target = Scripted::new(vec![]);
        scheduler.register("s", target.clone()).await;

        scheduler.notify_change("s").await;
        assert!(scheduler.unregister("s").await);
        tokio::time::sleep(Duration::from_secs(3600)).await;

        assert_eq!(target.calls(), 0);
        assert!(scheduler.sync_now("s").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_aborts_tasks() {
        let target = Scripted::new(vec![]);
        {
            let scheduler = SyncScheduler::new(SyncConfig::default(), linked_meta("s").await);
            scheduler.register("s", target.clone()).await;
            scheduler.notify_change("s").await;
        }
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(target.calls(), 0);
    }
}
