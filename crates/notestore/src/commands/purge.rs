use tracing::info;

use crate::error::Result;
use crate::storage::NoteStorage;

/// Hard delete. Works on trashed and non-trashed notes alike.
pub async fn run(storage: &NoteStorage, id: &str) -> Result<()> {
    let _guard = storage.lock().await;
    apply(storage, id).await
}

pub(crate) async fn apply(storage: &NoteStorage, id: &str) -> Result<()> {
    storage.backend().purge_note(id).await?;

    let mut patch = storage.snapshot().patch();
    patch.remove_note(id);
    storage.publish(patch.finish());

    info!(storage = %storage.id(), note = %id, "Purged note");
    Ok(())
}
