use crate::error::Result;
use crate::model::{Attachment, AttachmentUpload, BackendKind, FolderDoc, NoteDoc, TagDoc};
use async_trait::async_trait;

/// Abstract interface for raw document I/O.
/// This trait handles the "how" of storage (document database vs directory),
/// while NoteStore handles the "what" (validation, folder chains, cascades).
#[async_trait]
pub trait DocBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Create directories, load sidecars, install views. Safe to call twice.
    async fn prepare(&self) -> Result<()>;

    // --- Folders ---

    async fn load_folder(&self, pathname: &str) -> Result<Option<FolderDoc>>;

    /// Persist a folder and return the stored record (with its new revision
    /// token where the medium tracks one).
    async fn put_folder(&self, folder: FolderDoc) -> Result<FolderDoc>;

    /// Delete a folder record. Deleting a missing folder is a no-op.
    async fn delete_folder(&self, pathname: &str) -> Result<()>;

    async fn list_folders(&self) -> Result<Vec<FolderDoc>>;

    // --- Tags ---

    async fn load_tag(&self, name: &str) -> Result<Option<TagDoc>>;

    async fn put_tag(&self, tag: TagDoc) -> Result<TagDoc>;

    /// Delete a tag record. Deleting a missing tag is a no-op.
    async fn delete_tag(&self, name: &str) -> Result<()>;

    async fn list_tags(&self) -> Result<Vec<TagDoc>>;

    // --- Notes ---

    async fn load_note(&self, id: &str) -> Result<Option<NoteDoc>>;

    /// Persist the whole note. MUST NOT leave a partially written record.
    async fn put_note(&self, note: NoteDoc) -> Result<NoteDoc>;

    async fn delete_note(&self, id: &str) -> Result<()>;

    async fn list_notes(&self) -> Result<Vec<NoteDoc>>;

    /// Notes whose `folderPathname` equals `pathname`, trashed ones included.
    async fn notes_by_folder(&self, pathname: &str) -> Result<Vec<NoteDoc>> {
        Ok(self
            .list_notes()
            .await?
            .into_iter()
            .filter(|n| n.folder_pathname == pathname)
            .collect())
    }

    /// Notes carrying `name`, trashed ones included.
    async fn notes_by_tag(&self, name: &str) -> Result<Vec<NoteDoc>> {
        Ok(self
            .list_notes()
            .await?
            .into_iter()
            .filter(|n| n.has_tag(name))
            .collect())
    }

    // --- Attachments ---

    async fn put_attachments(&self, uploads: Vec<AttachmentUpload>) -> Result<Vec<Attachment>>;

    /// Returns NotFound when no attachment has that name.
    async fn delete_attachment(&self, name: &str) -> Result<()>;

    async fn list_attachments(&self) -> Result<Vec<Attachment>>;
}
