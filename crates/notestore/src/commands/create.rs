use tracing::debug;

use super::helpers::publish_note;
use crate::error::Result;
use crate::model::{NewNote, NoteDoc};
use crate::storage::NoteStorage;

pub async fn run(storage: &NoteStorage, props: NewNote) -> Result<NoteDoc> {
    let _guard = storage.lock().await;
    let note = storage.backend().create_note(props).await?;
    publish_note(storage, note.clone()).await;

    debug!(storage = %storage.id(), note = %note.id, "Indexed new note");
    Ok(note)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{assert_consistent, memory_storage};

    #[tokio::test]
    async fn test_create_indexes_folder_chain_and_tags() {
        let storage = memory_storage("s").await;

        let note = run(
            &storage,
            NewNote::titled("x")
                .in_folder("/proj/notes")
                .with_tags(["a", "b"]),
        )
        .await
        .unwrap();

        let snapshot = storage.snapshot();
        assert!(snapshot.folder("/proj").unwrap().note_id_set.is_empty());
        assert!(snapshot
            .folder("/proj/notes")
            .unwrap()
            .note_id_set
            .contains(&note.id));
        assert!(snapshot.tag("a").unwrap().note_id_set.contains(&note.id));
        assert!(snapshot.tag("b").unwrap().note_id_set.contains(&note.id));
        assert_consistent(&storage);
    }

    #[tokio::test]
    async fn test_create_defaults_to_root() {
        let storage = memory_storage("s").await;
        let note = run(&storage, NewNote::default()).await.unwrap();

        assert_eq!(note.folder_pathname, "/");
        assert!(!note.trashed);
        assert!(storage
            .snapshot()
            .folder("/")
            .unwrap()
            .note_id_set
            .contains(&note.id));
    }

    #[tokio::test]
    async fn test_invalid_tag_leaves_index_untouched() {
        let storage = memory_storage("s").await;
        let before = storage.snapshot();

        let err = run(&storage, NewNote::titled("x").with_tags(["bad tag"]))
            .await
            .unwrap_err();

        assert!(err.is_unprocessable());
        assert!(std::sync::Arc::ptr_eq(&before, &storage.snapshot()));
    }
}
