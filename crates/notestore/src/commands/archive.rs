//! Archiving sets `archivedAt` on a note. An archived note keeps its folder
//! and tag memberships; archiving only stamps the record.

use chrono::Utc;

use super::update;
use crate::error::{Result, StoreError};
use crate::model::{NoteDoc, NoteUpdate};
use crate::storage::NoteStorage;

pub async fn archive(storage: &NoteStorage, id: &str) -> Result<NoteDoc> {
    let _guard = storage.lock().await;
    let note = current(storage, id).await?;
    if note.archived_at.is_some() {
        return Ok(note);
    }
    let change = NoteUpdate {
        archived_at: Some(Some(Utc::now())),
        ..Default::default()
    };
    update::apply(storage, id, change).await
}

pub async fn unarchive(storage: &NoteStorage, id: &str) -> Result<NoteDoc> {
    let _guard = storage.lock().await;
    let note = current(storage, id).await?;
    if note.archived_at.is_none() {
        return Ok(note);
    }
    let change = NoteUpdate {
        archived_at: Some(None),
        ..Default::default()
    };
    update::apply(storage, id, change).await
}

async fn current(storage: &NoteStorage, id: &str) -> Result<NoteDoc> {
    storage
        .backend()
        .get_note(id)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("note '{}'", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::create;
    use crate::commands::test_support::{assert_consistent, memory_storage};
    use crate::model::NewNote;

    #[tokio::test]
    async fn archives_and_unarchives() {
        let storage = memory_storage("s").await;
        let note = create::run(&storage, NewNote::titled("x").in_folder("/a"))
            .await
            .unwrap();

        let archived = archive(&storage, &note.id).await.unwrap();
        assert!(archived.archived_at.is_some());
        // membership is unaffected
        assert!(storage
            .snapshot()
            .folder("/a")
            .unwrap()
            .note_id_set
            .contains(&note.id));

        let restored = unarchive(&storage, &note.id).await.unwrap();
        assert!(restored.archived_at.is_none());
        assert_consistent(&storage);
    }

    #[tokio::test]
    async fn archive_is_idempotent() {
        let storage = memory_storage("s").await;
        let note = create::run(&storage, NewNote::titled("x")).await.unwrap();
        let first = archive(&storage, &note.id).await.unwrap();
        let second = archive(&storage, &note.id).await.unwrap();
        assert_eq!(first.archived_at, second.archived_at);
    }

    #[tokio::test]
    async fn archive_missing_note() {
        let storage = memory_storage("s").await;
        assert!(archive(&storage, "note:none").await.unwrap_err().is_not_found());
    }
}
