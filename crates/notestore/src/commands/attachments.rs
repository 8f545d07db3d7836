use tracing::debug;

use crate::error::Result;
use crate::model::{Attachment, AttachmentUpload};
use crate::storage::NoteStorage;

/// Upload files. The returned handles carry the names the backend stored
/// them under, which may differ from the uploaded names.
pub async fn add(storage: &NoteStorage, files: Vec<AttachmentUpload>) -> Result<Vec<Attachment>> {
    let _guard = storage.lock().await;
    let attachments = storage.backend().upsert_attachments(files).await?;

    let mut patch = storage.snapshot().patch();
    for attachment in &attachments {
        patch.put_attachment(attachment.clone());
    }
    storage.publish(patch.finish());

    debug!(storage = %storage.id(), count = attachments.len(), "Added attachments");
    Ok(attachments)
}

pub async fn remove(storage: &NoteStorage, name: &str) -> Result<()> {
    let _guard = storage.lock().await;
    storage.backend().remove_attachment(name).await?;

    let mut patch = storage.snapshot().patch();
    patch.remove_attachment(name);
    storage.publish(patch.finish());

    debug!(storage = %storage.id(), attachment = %name, "Removed attachment");
    Ok(())
}
