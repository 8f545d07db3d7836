use tracing::debug;

use super::helpers::publish_note;
use crate::error::Result;
use crate::model::NoteDoc;
use crate::storage::NoteStorage;

/// Restore a trashed note. The backend recreates its folder chain and tags
/// if they were removed in the meantime; those come back into the index too.
pub async fn run(storage: &NoteStorage, id: &str) -> Result<NoteDoc> {
    let _guard = storage.lock().await;
    let note = storage.backend().untrash_note(id).await?;
    publish_note(storage, note.clone()).await;

    debug!(storage = %storage.id(), note = %note.id, "Restored note");
    Ok(note)
}
