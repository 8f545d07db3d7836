//! # API Facade
//!
//! [`NotesApi`] is the single entry point UIs talk to. It is a **thin
//! facade** over the command layer: it looks up the storage by id,
//! dispatches to `commands::*`, and tells the sync scheduler a storage
//! changed.
//!
//! ## What the API Does NOT Do
//!
//! - **Business logic**: that belongs in `commands/*.rs` and the backends
//! - **Presentation**: returns canonical records and snapshots, not strings
//!
//! ## Reading
//!
//! UIs read through [`NotesApi::snapshot`] (the current index of a storage)
//! or [`NotesApi::subscribe`] (a `watch` receiver updated after every
//! mutation). Snapshots are immutable; holding one never blocks writers.
//!
//! ## Storage Lifecycle
//!
//! Storages are listed in the local metadata store (`storages.json`) and
//! opened by [`crate::init::initialize`]. The API can add, rename and
//! remove them, and link replicated ones to a remote for background sync.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::info;

use crate::commands;
use crate::commands::doctor::DoctorReport;
use crate::error::{Result, StoreError};
use crate::index::StorageSnapshot;
use crate::init::{open_storage, replica_path};
use crate::meta::{CloudStorageLink, MetaStore, StorageMeta};
use crate::model::{
    AllDocsMap, Attachment, AttachmentUpload, BackendKind, FolderDoc, FolderProps, NewNote,
    NoteDoc, NoteUpdate,
};
use crate::storage::NoteStorage;
use crate::store::docdb::RemoteDocDb;
use crate::store::sqlite::SqliteDocDb;
use crate::store::{RemoveFolderOutcome, RemoveTagOutcome, RenameFolderOutcome};
use crate::sync::{SyncConfig, SyncEvent, SyncOutcome, SyncScheduler, SyncStatus, SyncTarget};

/// Where a new storage keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    /// A replicated database under the data directory.
    Replicated,
    /// A plain directory.
    FileSystem(PathBuf),
}

/// Canonical content of a storage, for export.
#[derive(Debug, Clone)]
pub struct ExportBundle {
    pub docs: AllDocsMap,
    pub attachments: HashMap<String, Attachment>,
}

pub struct NotesApi {
    data_dir: PathBuf,
    meta: Arc<MetaStore>,
    scheduler: SyncScheduler,
    storages: RwLock<HashMap<String, Arc<NoteStorage>>>,
}

impl NotesApi {
    pub fn new(data_dir: impl Into<PathBuf>, meta: Arc<MetaStore>, sync: SyncConfig) -> Self {
        Self {
            data_dir: data_dir.into(),
            scheduler: SyncScheduler::new(sync, meta.clone()),
            meta,
            storages: RwLock::new(HashMap::new()),
        }
    }

    pub fn data_dir(&self) -> &std::path::Path {
        &self.data_dir
    }

    pub fn meta(&self) -> &Arc<MetaStore> {
        &self.meta
    }

    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    // --- Storages ---

    pub async fn storage(&self, id: &str) -> Result<Arc<NoteStorage>> {
        self.storages
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("storage '{}'", id)))
    }

    /// Ids of every open storage, sorted.
    pub async fn storage_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.storages.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Make an already opened storage available. Used at start-up.
    pub(crate) async fn attach(&self, storage: Arc<NoteStorage>) {
        self.storages
            .write()
            .await
            .insert(storage.id().to_string(), storage);
    }

    pub async fn create_storage(
        &self,
        name: &str,
        location: StorageLocation,
    ) -> Result<Arc<NoteStorage>> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let meta = match location {
            StorageLocation::Replicated => StorageMeta {
                id: id.clone(),
                name: name.to_string(),
                kind: BackendKind::Replicated,
                location: None,
                cloud_storage: None,
            },
            StorageLocation::FileSystem(dir) => StorageMeta {
                id: id.clone(),
                name: name.to_string(),
                kind: BackendKind::FileSystem,
                location: Some(dir.to_string_lossy().into_owned()),
                cloud_storage: None,
            },
        };

        let storage = Arc::new(open_storage(&self.data_dir, &meta).await?);
        self.meta.add(meta).await?;
        self.attach(storage.clone()).await;
        info!(storage = %id, name = %name, kind = ?storage.kind(), "Created storage");
        Ok(storage)
    }

    /// Forget a storage. A replicated storage's database is closed once the
    /// write in progress finishes, then deleted; a filesystem storage's
    /// directory is left on disk.
    pub async fn remove_storage(&self, id: &str) -> Result<()> {
        let storage = self.storage(id).await?;
        self.scheduler.unregister(id).await;
        self.meta.remove(id).await?;
        self.storages.write().await.remove(id);

        storage.close().await?;
        if storage.kind() == BackendKind::Replicated {
            for path in SqliteDocDb::files(&replica_path(&self.data_dir, id)) {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        info!(storage = %id, "Removed storage");
        Ok(())
    }

    pub async fn rename_storage(&self, id: &str, name: &str) -> Result<()> {
        let storage = self.storage(id).await?;
        self.meta.rename(id, name).await?;
        storage.set_name(name).await;
        Ok(())
    }

    /// Connect a replicated storage to a remote and start syncing it in the
    /// background.
    pub async fn link_cloud_storage(
        &self,
        id: &str,
        remote: Arc<dyn RemoteDocDb>,
        link: CloudStorageLink,
    ) -> Result<watch::Receiver<SyncStatus>> {
        let storage = self.storage(id).await?;
        let replica = storage.replica().ok_or_else(|| {
            StoreError::unprocessable(format!("storage '{}' cannot sync", id))
        })?;
        replica.link(remote).await;
        self.meta.link_cloud(id, link).await?;
        let target: Arc<dyn SyncTarget> = storage.clone();
        Ok(self.scheduler.register(id, target).await)
    }

    pub async fn unlink_cloud_storage(&self, id: &str) -> Result<()> {
        let storage = self.storage(id).await?;
        self.scheduler.unregister(id).await;
        if let Some(replica) = storage.replica() {
            replica.unlink().await;
        }
        self.meta.unlink_cloud(id).await
    }

    /// Sync now instead of waiting for the timer.
    pub async fn sync_storage(&self, id: &str) -> Result<SyncOutcome> {
        self.storage(id).await?;
        Ok(self.scheduler.sync_now(id).await?)
    }

    pub async fn sync_status(&self, id: &str) -> Option<watch::Receiver<SyncStatus>> {
        self.scheduler.status(id).await
    }

    pub fn sync_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.scheduler.subscribe()
    }

    // --- Reading ---

    pub async fn snapshot(&self, id: &str) -> Result<Arc<StorageSnapshot>> {
        Ok(self.storage(id).await?.snapshot())
    }

    pub async fn subscribe(&self, id: &str) -> Result<watch::Receiver<Arc<StorageSnapshot>>> {
        Ok(self.storage(id).await?.subscribe())
    }

    /// Canonical content straight from the backend.
    pub async fn export_docs(&self, id: &str) -> Result<ExportBundle> {
        let storage = self.storage(id).await?;
        let _guard = storage.lock().await;
        Ok(ExportBundle {
            docs: storage.backend().get_all_docs_map().await?,
            attachments: storage.backend().get_attachment_map().await?,
        })
    }

    // --- Notes ---

    pub async fn create_note(&self, storage_id: &str, props: NewNote) -> Result<NoteDoc> {
        let storage = self.storage(storage_id).await?;
        let note = commands::create::run(&storage, props).await?;
        self.changed(storage_id).await;
        Ok(note)
    }

    pub async fn update_note(
        &self,
        storage_id: &str,
        note_id: &str,
        update: NoteUpdate,
    ) -> Result<NoteDoc> {
        let storage = self.storage(storage_id).await?;
        let note = commands::update::run(&storage, note_id, update).await?;
        self.changed(storage_id).await;
        Ok(note)
    }

    pub async fn trash_note(&self, storage_id: &str, note_id: &str) -> Result<NoteDoc> {
        let storage = self.storage(storage_id).await?;
        let note = commands::trash::run(&storage, note_id).await?;
        self.changed(storage_id).await;
        Ok(note)
    }

    pub async fn untrash_note(&self, storage_id: &str, note_id: &str) -> Result<NoteDoc> {
        let storage = self.storage(storage_id).await?;
        let note = commands::untrash::run(&storage, note_id).await?;
        self.changed(storage_id).await;
        Ok(note)
    }

    pub async fn purge_note(&self, storage_id: &str, note_id: &str) -> Result<()> {
        let storage = self.storage(storage_id).await?;
        commands::purge::run(&storage, note_id).await?;
        self.changed(storage_id).await;
        Ok(())
    }

    pub async fn bookmark_note(&self, storage_id: &str, note_id: &str) -> Result<NoteDoc> {
        let storage = self.storage(storage_id).await?;
        let note = commands::bookmark::bookmark(&storage, note_id).await?;
        self.changed(storage_id).await;
        Ok(note)
    }

    pub async fn unbookmark_note(&self, storage_id: &str, note_id: &str) -> Result<NoteDoc> {
        let storage = self.storage(storage_id).await?;
        let note = commands::bookmark::unbookmark(&storage, note_id).await?;
        self.changed(storage_id).await;
        Ok(note)
    }

    pub async fn archive_note(&self, storage_id: &str, note_id: &str) -> Result<NoteDoc> {
        let storage = self.storage(storage_id).await?;
        let note = commands::archive::archive(&storage, note_id).await?;
        self.changed(storage_id).await;
        Ok(note)
    }

    pub async fn unarchive_note(&self, storage_id: &str, note_id: &str) -> Result<NoteDoc> {
        let storage = self.storage(storage_id).await?;
        let note = commands::archive::unarchive(&storage, note_id).await?;
        self.changed(storage_id).await;
        Ok(note)
    }

    /// Returns the note as created in the target storage, under its new id.
    pub async fn move_note_to_other_storage(
        &self,
        source_id: &str,
        note_id: &str,
        target_id: &str,
        folder_pathname: &str,
    ) -> Result<NoteDoc> {
        let source = self.storage(source_id).await?;
        let target = self.storage(target_id).await?;
        let note = commands::move_note::run(&source, note_id, &target, folder_pathname).await?;
        self.changed(source_id).await;
        if target_id != source_id {
            self.changed(target_id).await;
        }
        Ok(note)
    }

    // --- Folders and tags ---

    pub async fn create_folder(
        &self,
        storage_id: &str,
        pathname: &str,
        props: Option<FolderProps>,
    ) -> Result<FolderDoc> {
        let storage = self.storage(storage_id).await?;
        let folder = commands::folders::create(&storage, pathname, props).await?;
        self.changed(storage_id).await;
        Ok(folder)
    }

    pub async fn rename_folder(
        &self,
        storage_id: &str,
        old: &str,
        new: &str,
    ) -> Result<RenameFolderOutcome> {
        let storage = self.storage(storage_id).await?;
        let outcome = commands::folders::rename(&storage, old, new).await?;
        self.changed(storage_id).await;
        Ok(outcome)
    }

    pub async fn remove_folder(
        &self,
        storage_id: &str,
        pathname: &str,
    ) -> Result<RemoveFolderOutcome> {
        let storage = self.storage(storage_id).await?;
        let outcome = commands::folders::remove(&storage, pathname).await?;
        self.changed(storage_id).await;
        Ok(outcome)
    }

    pub async fn remove_tag(&self, storage_id: &str, name: &str) -> Result<RemoveTagOutcome> {
        let storage = self.storage(storage_id).await?;
        let outcome = commands::tags::remove(&storage, name).await?;
        self.changed(storage_id).await;
        Ok(outcome)
    }

    // --- Attachments ---

    pub async fn add_attachments(
        &self,
        storage_id: &str,
        files: Vec<AttachmentUpload>,
    ) -> Result<Vec<Attachment>> {
        let storage = self.storage(storage_id).await?;
        let attachments = commands::attachments::add(&storage, files).await?;
        self.changed(storage_id).await;
        Ok(attachments)
    }

    pub async fn remove_attachment(&self, storage_id: &str, name: &str) -> Result<()> {
        let storage = self.storage(storage_id).await?;
        commands::attachments::remove(&storage, name).await?;
        self.changed(storage_id).await;
        Ok(())
    }

    // --- Maintenance ---

    pub async fn doctor(&self, storage_id: &str) -> Result<DoctorReport> {
        let storage = self.storage(storage_id).await?;
        commands::doctor::run(&storage).await
    }

    async fn changed(&self, storage_id: &str) {
        self.scheduler.notify_change(storage_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::store::docdb::InMemoryRemote;
    use tempfile::TempDir;

    async fn api() -> (TempDir, NotesApi) {
        let dir = tempfile::tempdir().unwrap();
        let api = NotesApi::new(
            dir.path(),
            Arc::new(MetaStore::in_memory()),
            SyncConfig::default(),
        );
        (dir, api)
    }

    #[tokio::test]
    async fn test_unknown_storage_is_not_found() {
        let (_dir, api) = api().await;
        let err = api
            .create_note("nope", NewNote::titled("x"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_create_and_list_storages() {
        let (dir, api) = api().await;
        let replicated = api
            .create_storage("Personal", StorageLocation::Replicated)
            .await
            .unwrap();
        let fs = api
            .create_storage(
                "Blog",
                StorageLocation::FileSystem(dir.path().join("blog")),
            )
            .await
            .unwrap();

        assert_eq!(api.storage_ids().await.len(), 2);
        assert_eq!(replicated.kind(), BackendKind::Replicated);
        assert_eq!(fs.kind(), BackendKind::FileSystem);
        assert!(dir.path().join("blog").join("boostnote.json").exists());
        assert_eq!(api.meta().list().await.len(), 2);
    }

    #[tokio::test]
    async fn test_mutations_publish_snapshots() {
        let (_dir, api) = api().await;
        let storage = api
            .create_storage("Personal", StorageLocation::Replicated)
            .await
            .unwrap();
        let id = storage.id().to_string();
        let mut rx = api.subscribe(&id).await.unwrap();

        let note = api
            .create_note(&id, NewNote::titled("x").in_folder("/a"))
            .await
            .unwrap();

        rx.changed().await.unwrap();
        assert!(rx.borrow().note(&note.id).is_some());
        assert!(api
            .snapshot(&id)
            .await
            .unwrap()
            .folder("/a")
            .unwrap()
            .note_id_set
            .contains(&note.id));
    }

    #[tokio::test]
    async fn test_rename_and_remove_storage() {
        let (dir, api) = api().await;
        let storage = api
            .create_storage("Personal", StorageLocation::Replicated)
            .await
            .unwrap();
        let id = storage.id().to_string();
        api.create_note(&id, NewNote::titled("x")).await.unwrap();
        assert!(replica_path(dir.path(), &id).exists());

        api.rename_storage(&id, "Work").await.unwrap();
        assert_eq!(storage.name().await, "Work");
        assert_eq!(api.meta().get(&id).await.unwrap().name, "Work");

        api.remove_storage(&id).await.unwrap();
        assert!(api.storage(&id).await.is_err());
        assert!(api.meta().get(&id).await.is_none());
        assert!(!replica_path(dir.path(), &id).exists());
    }

    #[tokio::test]
    async fn test_remove_storage_waits_for_the_pending_write() {
        let (dir, api) = api().await;
        let api = Arc::new(api);
        let storage = api
            .create_storage("Personal", StorageLocation::Replicated)
            .await
            .unwrap();
        let id = storage.id().to_string();
        let path = replica_path(dir.path(), &id);

        let writer = storage.lock().await;
        let removal = {
            let api = api.clone();
            let id = id.clone();
            tokio::spawn(async move { api.remove_storage(&id).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!removal.is_finished());

        // the write in progress lands before the database goes away
        storage
            .backend()
            .create_note(NewNote::titled("late"))
            .await
            .unwrap();
        drop(writer);
        removal.await.unwrap().unwrap();

        for file in SqliteDocDb::files(&path) {
            assert!(!file.exists(), "{} left behind", file.display());
        }
        assert!(storage
            .backend()
            .create_note(NewNote::titled("after"))
            .await
            .is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_link_and_sync_storage() {
        let (_dir, api) = api().await;
        let storage = api
            .create_storage("Personal", StorageLocation::Replicated)
            .await
            .unwrap();
        let id = storage.id().to_string();
        let note = api.create_note(&id, NewNote::titled("x")).await.unwrap();

        let remote = Arc::new(InMemoryRemote::new());
        api.link_cloud_storage(&id, remote.clone(), CloudStorageLink::default())
            .await
            .unwrap();

        let outcome = api.sync_storage(&id).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Completed(r) if r.pushed > 0));
        assert!(remote.doc(&note.id).await.is_some());

        let link = api.meta().get(&id).await.unwrap().cloud_storage.unwrap();
        assert!(link.synced_at.is_some());
    }

    #[tokio::test]
    async fn test_gone_remote_unlinks_storage() {
        let (_dir, api) = api().await;
        let storage = api
            .create_storage("Personal", StorageLocation::Replicated)
            .await
            .unwrap();
        let id = storage.id().to_string();

        let remote = Arc::new(InMemoryRemote::new());
        api.link_cloud_storage(&id, remote.clone(), CloudStorageLink::default())
            .await
            .unwrap();
        remote.set_gone(true);

        let err = api.sync_storage(&id).await.unwrap_err();
        assert!(matches!(err, StoreError::Sync(SyncError::RemoteGone(_))));
        assert!(api.meta().get(&id).await.unwrap().cloud_storage.is_none());
        assert!(!storage.replica().unwrap().is_linked().await);
        assert!(!api.scheduler().is_registered(&id).await);
    }

    #[tokio::test]
    async fn test_filesystem_storage_cannot_link() {
        let (dir, api) = api().await;
        let fs = api
            .create_storage("Blog", StorageLocation::FileSystem(dir.path().join("b")))
            .await
            .unwrap();
        let err = api
            .link_cloud_storage(
                fs.id(),
                Arc::new(InMemoryRemote::new()),
                CloudStorageLink::default(),
            )
            .await
            .unwrap_err();
        assert!(err.is_unprocessable());
    }

    #[tokio::test]
    async fn test_export_matches_snapshot() {
        let (_dir, api) = api().await;
        let storage = api
            .create_storage("Personal", StorageLocation::Replicated)
            .await
            .unwrap();
        let id = storage.id().to_string();
        let note = api
            .create_note(&id, NewNote::titled("x").with_tags(["t"]))
            .await
            .unwrap();

        let bundle = api.export_docs(&id).await.unwrap();
        assert_eq!(bundle.docs.note_map.get(&note.id), Some(&note));
        assert!(bundle.docs.tag_map.contains_key("t"));
        assert!(bundle.docs.folder_map.contains_key("/"));
    }
}
