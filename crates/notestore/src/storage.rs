//! # Storages
//!
//! A [`NoteStorage`] is one isolated collection of notes, folders, tags and
//! attachments: a backend plus the published [`StorageSnapshot`] of its
//! index. Several storages live side by side in one [`crate::api::NotesApi`].
//!
//! ## Writers and Readers
//!
//! Mutations go through [`crate::commands`], which hold [`NoteStorage::lock`]
//! from the backend call until the new snapshot is published. Readers never
//! take that lock: [`NoteStorage::snapshot`] hands out the current `Arc` and
//! [`NoteStorage::subscribe`] yields a `watch` receiver that sees every
//! publication.

use std::sync::Arc;
use tokio::sync::{watch, Mutex, MutexGuard, RwLock};
use tracing::{info, warn};

use crate::error::Result;
use crate::index::StorageSnapshot;
use crate::model::BackendKind;
use crate::store::NoteBackend;
use crate::sync::Replica;

pub struct NoteStorage {
    id: String,
    name: RwLock<String>,
    kind: BackendKind,
    backend: Arc<dyn NoteBackend>,
    replica: Option<Arc<dyn Replica>>,
    snapshot: watch::Sender<Arc<StorageSnapshot>>,
    write_lock: Mutex<()>,
}

impl NoteStorage {
    /// Initialize the backend (including the reconciliation pass) and build
    /// the first snapshot.
    pub async fn load(
        id: impl Into<String>,
        name: impl Into<String>,
        backend: Arc<dyn NoteBackend>,
    ) -> Result<Self> {
        let id = id.into();
        let report = backend.init().await?;
        if !report.is_clean() {
            info!(
                storage = %id,
                folders = report.created_folders.len(),
                tags = report.created_tags.len(),
                "Repaired missing records on load"
            );
        }
        let snapshot = Self::read_canonical(backend.as_ref()).await?;
        let (tx, _) = watch::channel(Arc::new(snapshot));
        Ok(Self {
            id,
            name: RwLock::new(name.into()),
            kind: backend.kind(),
            backend,
            replica: None,
            snapshot: tx,
            write_lock: Mutex::new(()),
        })
    }

    /// Attach the replication handle of a replicated backend.
    pub fn with_replica(mut self, replica: Arc<dyn Replica>) -> Self {
        if self.kind != BackendKind::Replicated {
            warn!(storage = %self.id, "Ignoring replica for a non-replicated storage");
            return self;
        }
        self.replica = Some(replica);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn name(&self) -> String {
        self.name.read().await.clone()
    }

    pub async fn set_name(&self, name: impl Into<String>) {
        *self.name.write().await = name.into();
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn backend(&self) -> &Arc<dyn NoteBackend> {
        &self.backend
    }

    pub fn replica(&self) -> Option<&Arc<dyn Replica>> {
        self.replica.as_ref()
    }

    pub fn snapshot(&self) -> Arc<StorageSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<StorageSnapshot>> {
        self.snapshot.subscribe()
    }

    /// Serializes writers on this storage.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    /// Wait for the writer in progress, then release the backend's database.
    /// Writes issued afterwards fail instead of touching the disk.
    pub(crate) async fn close(&self) -> Result<()> {
        let _guard = self.lock().await;
        if let Some(replica) = &self.replica {
            replica.close().await?;
        }
        Ok(())
    }

    /// Replace the published snapshot. Callers hold [`Self::lock`].
    pub(crate) fn publish(&self, snapshot: StorageSnapshot) -> Arc<StorageSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.snapshot.send_replace(snapshot.clone());
        snapshot
    }

    /// A snapshot built from scratch out of the backend's canonical data.
    pub(crate) async fn rebuild(&self) -> Result<StorageSnapshot> {
        Self::read_canonical(self.backend.as_ref()).await
    }

    async fn read_canonical(backend: &dyn NoteBackend) -> Result<StorageSnapshot> {
        let docs = backend.get_all_docs_map().await?;
        let attachments = backend.get_attachment_map().await?;
        Ok(StorageSnapshot::build(docs, attachments))
    }
}

impl std::fmt::Debug for NoteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoteStorage")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewNote;
    use crate::store::{NoteStore, ReplicatedBackend};
    use crate::store::sqlite::SqliteDocDb;

    fn memory_backend() -> Arc<dyn NoteBackend> {
        Arc::new(NoteStore::with_backend(ReplicatedBackend::new(
            SqliteDocDb::in_memory().unwrap(),
        )))
    }

    #[tokio::test]
    async fn test_load_builds_index_with_root() {
        let storage = NoteStorage::load("s1", "Notes", memory_backend())
            .await
            .unwrap();
        let snapshot = storage.snapshot();
        assert!(snapshot.folder("/").is_some());
        assert!(snapshot.note_map.is_empty());
        assert_eq!(storage.kind(), BackendKind::Replicated);
    }

    #[tokio::test]
    async fn test_load_picks_up_existing_notes() {
        let backend = memory_backend();
        let note = backend
            .create_note(NewNote::titled("x").in_folder("/a").with_tags(["t"]))
            .await
            .unwrap();

        let storage = NoteStorage::load("s1", "Notes", backend).await.unwrap();
        let snapshot = storage.snapshot();
        assert!(snapshot.folder("/a").unwrap().note_id_set.contains(&note.id));
        assert!(snapshot.tag("t").unwrap().note_id_set.contains(&note.id));
    }

    #[tokio::test]
    async fn test_publish_notifies_subscribers() {
        let storage = NoteStorage::load("s1", "Notes", memory_backend())
            .await
            .unwrap();
        let mut rx = storage.subscribe();
        let before = storage.snapshot();

        storage.publish(StorageSnapshot::default());

        rx.changed().await.unwrap();
        assert!(rx.borrow().folder("/").is_none());
        assert!(before.folder("/").is_some());
    }

    #[tokio::test]
    async fn test_rename_storage() {
        let storage = NoteStorage::load("s1", "Notes", memory_backend())
            .await
            .unwrap();
        storage.set_name("Work").await;
        assert_eq!(storage.name().await, "Work");
    }
}
