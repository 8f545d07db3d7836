use tracing::info;

use super::helpers::{new_folders, recover_index};
use crate::error::Result;
use crate::model::{FolderDoc, FolderProps};
use crate::storage::NoteStorage;
use crate::store::{RemoveFolderOutcome, RenameFolderOutcome};

/// Create a folder (and its missing ancestors), or merge `props` into an
/// existing one.
pub async fn create(
    storage: &NoteStorage,
    pathname: &str,
    props: Option<FolderProps>,
) -> Result<FolderDoc> {
    let _guard = storage.lock().await;
    let folder = storage.backend().upsert_folder(pathname, props).await?;

    let snapshot = storage.snapshot();
    let mut patch = snapshot.patch();
    match new_folders(storage.backend().as_ref(), &snapshot, pathname).await {
        Ok(ancestors) => {
            for ancestor in ancestors {
                patch.upsert_folder(ancestor);
            }
            patch.upsert_folder(folder.clone());
            storage.publish(patch.finish());
        }
        Err(error) => {
            let mut fallback = snapshot.patch();
            fallback.upsert_folder(folder.clone());
            recover_index(storage, fallback, error).await;
        }
    }

    Ok(folder)
}

/// Move a folder and its whole subtree to `new`.
pub async fn rename(storage: &NoteStorage, old: &str, new: &str) -> Result<RenameFolderOutcome> {
    let _guard = storage.lock().await;
    let outcome = storage.backend().rename_folder(old, new).await?;

    let mut patch = storage.snapshot().patch();
    for folder in &outcome.folders {
        patch.upsert_folder(folder.clone());
    }
    for note in &outcome.notes {
        patch.put_note(note.clone());
    }
    for pathname in &outcome.removed_pathnames {
        patch.remove_folder(pathname);
    }
    storage.publish(patch.finish());

    info!(
        storage = %storage.id(),
        from = %old,
        to = %new,
        notes = outcome.notes.len(),
        "Renamed folder"
    );
    Ok(outcome)
}

/// Trash every note in the subtree and drop the subtree's folders.
pub async fn remove(storage: &NoteStorage, pathname: &str) -> Result<RemoveFolderOutcome> {
    let _guard = storage.lock().await;
    let outcome = storage.backend().remove_folder(pathname).await?;

    let mut patch = storage.snapshot().patch();
    for note in &outcome.trashed_notes {
        patch.put_note(note.clone());
    }
    for removed in &outcome.removed_pathnames {
        patch.remove_folder(removed);
    }
    storage.publish(patch.finish());

    info!(
        storage = %storage.id(),
        pathname = %pathname,
        trashed = outcome.trashed_notes.len(),
        "Removed folder"
    );
    Ok(outcome)
}
