use serde_json::Value;

use super::update;
use crate::error::{Result, StoreError};
use crate::model::{NoteDoc, NoteUpdate, BOOKMARKED_KEY};
use crate::storage::NoteStorage;

pub async fn bookmark(storage: &NoteStorage, id: &str) -> Result<NoteDoc> {
    set_bookmarked(storage, id, true).await
}

pub async fn unbookmark(storage: &NoteStorage, id: &str) -> Result<NoteDoc> {
    set_bookmarked(storage, id, false).await
}

async fn set_bookmarked(storage: &NoteStorage, id: &str, bookmarked: bool) -> Result<NoteDoc> {
    let _guard = storage.lock().await;
    let note = storage
        .backend()
        .get_note(id)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("note '{}'", id)))?;
    if note.is_bookmarked() == bookmarked {
        return Ok(note);
    }

    let mut data = note.data;
    if bookmarked {
        data.insert(BOOKMARKED_KEY.to_string(), Value::Bool(true));
    } else {
        data.remove(BOOKMARKED_KEY);
    }
    let change = NoteUpdate {
        data: Some(data),
        ..Default::default()
    };
    update::apply(storage, id, change).await
}
