use tracing::debug;

use super::helpers::publish_note;
use crate::error::Result;
use crate::model::{NoteDoc, NoteUpdate};
use crate::storage::NoteStorage;

pub async fn run(storage: &NoteStorage, id: &str, update: NoteUpdate) -> Result<NoteDoc> {
    let _guard = storage.lock().await;
    apply(storage, id, update).await
}

/// The update itself, for callers already holding the storage lock.
pub(crate) async fn apply(storage: &NoteStorage, id: &str, update: NoteUpdate) -> Result<NoteDoc> {
    let note = storage.backend().update_note(id, update).await?;
    publish_note(storage, note.clone()).await;

    debug!(storage = %storage.id(), note = %note.id, "Re-indexed updated note");
    Ok(note)
}
