use tracing::warn;

use crate::error::{Result, StoreError};
use crate::folders::pathname_chain;
use crate::index::{SnapshotPatch, StorageSnapshot};
use crate::model::{FolderDoc, NoteDoc, TagDoc};
use crate::storage::NoteStorage;
use crate::store::NoteBackend;

/// Folder records along `pathname`'s chain that the index has no entry for.
pub async fn new_folders(
    backend: &dyn NoteBackend,
    snapshot: &StorageSnapshot,
    pathname: &str,
) -> Result<Vec<FolderDoc>> {
    let mut folders = Vec::new();
    for p in pathname_chain(pathname) {
        if snapshot.folder(&p).is_some() {
            continue;
        }
        if let Some(folder) = backend.get_folder(&p).await? {
            folders.push(folder);
        }
    }
    Ok(folders)
}

/// Tag records for `names` that the index has no entry for.
pub async fn new_tags(
    backend: &dyn NoteBackend,
    snapshot: &StorageSnapshot,
    names: &[String],
) -> Result<Vec<TagDoc>> {
    let mut tags = Vec::new();
    for name in names {
        if snapshot.tag(name).is_some() {
            continue;
        }
        if let Some(tag) = backend.get_tag(name).await? {
            tags.push(tag);
        }
    }
    Ok(tags)
}

/// Add `note` to `patch` together with any folder and tag entries it needs.
///
/// Backends create missing folders and tags even for trashed notes, so the
/// lookup runs regardless of the trash flag.
pub async fn patch_note(
    backend: &dyn NoteBackend,
    snapshot: &StorageSnapshot,
    patch: &mut SnapshotPatch,
    note: NoteDoc,
) -> Result<()> {
    for folder in new_folders(backend, snapshot, &note.folder_pathname).await? {
        patch.upsert_folder(folder);
    }
    for tag in new_tags(backend, snapshot, &note.tags).await? {
        patch.upsert_tag(tag);
    }
    patch.put_note(note);
    Ok(())
}

/// Index `note`, which the backend has already written.
///
/// A failed folder or tag lookup does not fail the command: the write is
/// done, so the index is recovered instead (see [`recover_index`]).
pub async fn publish_note(storage: &NoteStorage, note: NoteDoc) {
    let snapshot = storage.snapshot();
    let mut patch = snapshot.patch();
    match patch_note(storage.backend().as_ref(), &snapshot, &mut patch, note.clone()).await {
        Ok(()) => {
            storage.publish(patch.finish());
        }
        Err(error) => {
            let mut fallback = snapshot.patch();
            fallback.put_note(note);
            recover_index(storage, fallback, error).await;
        }
    }
}

/// Bring the index back in line after a successful write whose surrounding
/// lookups failed. Rebuilds from canonical data; if that fails too,
/// publishes `fallback`, which holds the written record alone.
pub async fn recover_index(storage: &NoteStorage, fallback: SnapshotPatch, error: StoreError) {
    warn!(
        storage = %storage.id(),
        error = %error,
        "Index lookup failed after a write, rebuilding"
    );
    match storage.rebuild().await {
        Ok(rebuilt) => {
            storage.publish(rebuilt);
        }
        Err(e) => {
            warn!(
                storage = %storage.id(),
                error = %e,
                "Rebuild failed, indexing the written record alone"
            );
            storage.publish(fallback.finish());
        }
    }
}
