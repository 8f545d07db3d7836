use tracing::debug;

use crate::error::Result;
use crate::model::NoteDoc;
use crate::storage::NoteStorage;

/// Soft-delete: the note stays in the note map but leaves every folder and
/// tag membership set.
pub async fn run(storage: &NoteStorage, id: &str) -> Result<NoteDoc> {
    let _guard = storage.lock().await;
    let note = storage.backend().trash_note(id).await?;

    let mut patch = storage.snapshot().patch();
    patch.put_note(note.clone());
    storage.publish(patch.finish());

    debug!(storage = %storage.id(), note = %note.id, "Trashed note");
    Ok(note)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::create;
    use crate::commands::test_support::{assert_consistent, memory_storage};
    use crate::model::NewNote;

    #[tokio::test]
    async fn test_trash_removes_membership_but_keeps_note() {
        let storage = memory_storage("s").await;
        let note = create::run(
            &storage,
            NewNote::titled("x").in_folder("/a").with_tags(["t"]),
        )
        .await
        .unwrap();

        let trashed = run(&storage, &note.id).await.unwrap();

        assert!(trashed.trashed);
        let snapshot = storage.snapshot();
        assert!(snapshot.note(&note.id).unwrap().trashed);
        assert!(snapshot.folder("/a").unwrap().note_id_set.is_empty());
        assert!(snapshot.tag("t").unwrap().note_id_set.is_empty());
        assert_consistent(&storage);
    }

    #[tokio::test]
    async fn test_trash_missing_note() {
        let storage = memory_storage("s").await;
        assert!(run(&storage, "note:missing").await.unwrap_err().is_not_found());
    }
}
