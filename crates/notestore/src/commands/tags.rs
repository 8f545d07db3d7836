use tracing::info;

use crate::error::Result;
use crate::storage::NoteStorage;
use crate::store::RemoveTagOutcome;

/// Strip a tag from every note holding it, trashed notes included, and drop
/// its entry.
pub async fn remove(storage: &NoteStorage, name: &str) -> Result<RemoveTagOutcome> {
    let _guard = storage.lock().await;
    let outcome = storage.backend().remove_tag(name).await?;

    let mut patch = storage.snapshot().patch();
    for note in &outcome.updated_notes {
        patch.put_note(note.clone());
    }
    patch.remove_tag(name);
    storage.publish(patch.finish());

    info!(
        storage = %storage.id(),
        tag = %name,
        notes = outcome.updated_notes.len(),
        "Removed tag"
    );
    Ok(outcome)
}
