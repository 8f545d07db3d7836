//! Moving a note between storages.
//!
//! The move is a create in the target followed by a purge in the source.
//! The new note gets a fresh id in the target and carries over title,
//! content, tags and data. Both storages are locked for the duration, in id
//! order, so two opposite moves cannot deadlock.
//!
//! If the purge fails after the create succeeded, the note exists in both
//! storages. The target's index already reflects the copy; the source's is
//! left alone and the error is returned.

use tracing::info;

use super::helpers::publish_note;
use super::update;
use crate::error::{Result, StoreError};
use crate::model::{NewNote, NoteDoc, NoteUpdate};
use crate::storage::NoteStorage;

pub async fn run(
    source: &NoteStorage,
    note_id: &str,
    target: &NoteStorage,
    folder_pathname: &str,
) -> Result<NoteDoc> {
    if source.id() == target.id() {
        let _guard = source.lock().await;
        return update::apply(source, note_id, NoteUpdate::move_to(folder_pathname)).await;
    }

    let (_first, _second) = if source.id() < target.id() {
        let a = source.lock().await;
        let b = target.lock().await;
        (a, b)
    } else {
        let b = target.lock().await;
        let a = source.lock().await;
        (b, a)
    };

    let original = source
        .backend()
        .get_note(note_id)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("note '{}'", note_id)))?;

    let copy = target
        .backend()
        .create_note(NewNote {
            title: Some(original.title.clone()),
            content: Some(original.content.clone()),
            tags: Some(original.tags.clone()),
            folder_pathname: Some(folder_pathname.to_string()),
            data: Some(original.data.clone()),
        })
        .await?;

    publish_note(target, copy.clone()).await;

    source.backend().purge_note(note_id).await?;
    let mut source_patch = source.snapshot().patch();
    source_patch.remove_note(note_id);
    source.publish(source_patch.finish());

    info!(
        from = %source.id(),
        to = %target.id(),
        note = %note_id,
        new_note = %copy.id,
        "Moved note between storages"
    );
    Ok(copy)
}
