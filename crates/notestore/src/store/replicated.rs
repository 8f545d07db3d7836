//! Backend over a revision-tracked document database.
//!
//! Folders, tags and notes are plain documents told apart by id prefix.
//! `find_notes_by_folder` / `find_notes_by_tag` are answered by the
//! `by_folder` and `by_tag` views of the `_design/notes` design document,
//! which `prepare()` reinstalls whenever its definition drifted.
//!
//! Attachments are binary attachments of the singleton document
//! `attachments`. Every upload re-reads that document's revision right
//! before writing, one file at a time; parallel uploads would race on it.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::backend::DocBackend;
use super::docdb::{
    replicate, DesignDoc, Doc, DocAttachment, DocDb, RemoteDocDb, SyncReport, ViewDef,
};
use super::mime::sniff_image_mime;
use super::sanitize_attachment_name;
use super::sqlite::SqliteDocDb;
use crate::error::{Result, StoreError, SyncError};
use crate::ids::{
    doc_kind, folder_id, tag_id, DocKind, FOLDER_ID_PREFIX, NOTE_ID_PREFIX, TAG_ID_PREFIX,
};
use crate::model::{
    Attachment, AttachmentData, AttachmentSource, AttachmentUpload, BackendKind, FolderDoc,
    NoteDoc, TagDoc,
};

pub const DESIGN_DOC_ID: &str = "_design/notes";
const DESIGN_DOC_NAME: &str = "notes";
pub const ATTACHMENTS_DOC_ID: &str = "attachments";

const DEFAULT_ATTACHMENT_MIME: &str = "application/octet-stream";

/// The views the backend relies on.
pub fn notes_design_doc() -> DesignDoc {
    let mut design = DesignDoc::default();
    design.views.insert(
        "by_folder".into(),
        ViewDef {
            id_prefix: NOTE_ID_PREFIX.into(),
            field: "folderPathname".into(),
        },
    );
    design.views.insert(
        "by_tag".into(),
        ViewDef {
            id_prefix: NOTE_ID_PREFIX.into(),
            field: "tags".into(),
        },
    );
    design
}

pub struct ReplicatedBackend {
    db: Arc<dyn DocDb>,
    remote: RwLock<Option<Arc<dyn RemoteDocDb>>>,
}

impl ReplicatedBackend {
    pub fn new(db: impl DocDb + 'static) -> Self {
        Self::with_db(Arc::new(db))
    }

    pub fn with_db(db: Arc<dyn DocDb>) -> Self {
        Self {
            db,
            remote: RwLock::new(None),
        }
    }

    /// Backend over the SQLite database at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let db = tokio::task::spawn_blocking(move || SqliteDocDb::open(path))
            .await
            .map_err(|e| StoreError::Store(format!("database task failed: {}", e)))??;
        Ok(Self::new(db))
    }

    /// Close the database. Writes already started finish first; every later
    /// call fails.
    pub async fn close(&self) -> Result<()> {
        self.db.close().await
    }

    pub fn db(&self) -> &Arc<dyn DocDb> {
        &self.db
    }

    pub async fn link(&self, remote: Arc<dyn RemoteDocDb>) {
        *self.remote.write().await = Some(remote);
    }

    /// Drop the remote. Later syncs fail until `link` is called again.
    pub async fn unlink(&self) {
        *self.remote.write().await = None;
    }

    pub async fn is_linked(&self) -> bool {
        self.remote.read().await.is_some()
    }

    /// One round of two-way replication with the linked remote.
    pub async fn sync(&self) -> std::result::Result<SyncReport, SyncError> {
        let remote = self
            .remote
            .read()
            .await
            .clone()
            .ok_or_else(|| SyncError::Local("storage is not linked to a remote".into()))?;
        replicate(self.db.as_ref(), remote.as_ref()).await
    }

    /// Returns true when the design document had to be (re)written.
    async fn install_views(&self) -> Result<bool> {
        let wanted = notes_design_doc().to_body()?;
        let current = self.db.get(DESIGN_DOC_ID).await?;
        if current.as_ref().map(|d| &d.body) == Some(&wanted) {
            return Ok(false);
        }

        let mut doc = Doc::new(DESIGN_DOC_ID, wanted);
        doc.rev = current.and_then(|d| d.rev);
        self.db.put(doc).await?;
        info!(design = DESIGN_DOC_ID, "installed note views");
        Ok(true)
    }

    async fn get_record<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>> {
        match self.db.get(id).await? {
            Some(doc) => Ok(Some(doc.to_record()?)),
            None => Ok(None),
        }
    }

    async fn put_record<T: Serialize + DeserializeOwned + Sync>(&self, record: &T) -> Result<T> {
        let stored = self.db.put(Doc::from_record(record)?).await?;
        stored.to_record()
    }

    async fn list_records<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        self.db
            .all_docs(prefix)
            .await?
            .iter()
            .map(|doc| doc.to_record())
            .collect()
    }

    async fn delete_doc(&self, id: &str) -> Result<()> {
        if let Some(rev) = self.db.get(id).await?.and_then(|d| d.rev) {
            self.db.remove(id, &rev).await?;
            debug!(doc = %id, "deleted document");
        }
        Ok(())
    }

    async fn query_notes(&self, view: &str, key: &str) -> Result<Vec<NoteDoc>> {
        self.db
            .query(DESIGN_DOC_NAME, view, key)
            .await?
            .iter()
            .map(|doc| doc.to_record())
            .collect()
    }

    fn attachment_handle(&self, name: String, mime_type: String) -> Attachment {
        let source = DbAttachmentSource {
            db: Arc::clone(&self.db),
            name: name.clone(),
        };
        Attachment::new(name, mime_type, Arc::new(source))
    }
}

fn is_note_id(id: &str) -> bool {
    doc_kind(id) == DocKind::Note && id != ATTACHMENTS_DOC_ID && !id.starts_with('_')
}

struct DbAttachmentSource {
    db: Arc<dyn DocDb>,
    name: String,
}

#[async_trait]
impl AttachmentSource for DbAttachmentSource {
    async fn load(&self) -> Result<AttachmentData> {
        let attachment = self
            .db
            .get_attachment(ATTACHMENTS_DOC_ID, &self.name)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("attachment '{}'", self.name)))?;
        Ok(AttachmentData::Blob(attachment.data))
    }
}

#[async_trait]
impl DocBackend for ReplicatedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Replicated
    }

    async fn prepare(&self) -> Result<()> {
        self.install_views().await?;
        Ok(())
    }

    async fn load_folder(&self, pathname: &str) -> Result<Option<FolderDoc>> {
        self.get_record(&folder_id(pathname)).await
    }

    async fn put_folder(&self, mut folder: FolderDoc) -> Result<FolderDoc> {
        if folder.real_id.is_none() {
            folder.real_id = Some(Uuid::new_v4().to_string());
        }
        self.put_record(&folder).await
    }

    async fn delete_folder(&self, pathname: &str) -> Result<()> {
        self.delete_doc(&folder_id(pathname)).await
    }

    async fn list_folders(&self) -> Result<Vec<FolderDoc>> {
        self.list_records(FOLDER_ID_PREFIX).await
    }

    async fn load_tag(&self, name: &str) -> Result<Option<TagDoc>> {
        self.get_record(&tag_id(name)).await
    }

    async fn put_tag(&self, tag: TagDoc) -> Result<TagDoc> {
        self.put_record(&tag).await
    }

    async fn delete_tag(&self, name: &str) -> Result<()> {
        self.delete_doc(&tag_id(name)).await
    }

    async fn list_tags(&self) -> Result<Vec<TagDoc>> {
        self.list_records(TAG_ID_PREFIX).await
    }

    async fn load_note(&self, id: &str) -> Result<Option<NoteDoc>> {
        if !is_note_id(id) {
            return Ok(None);
        }
        self.get_record(id).await
    }

    async fn put_note(&self, note: NoteDoc) -> Result<NoteDoc> {
        if !is_note_id(&note.id) {
            return Err(StoreError::unprocessable(format!(
                "'{}' is not a note id",
                note.id
            )));
        }
        self.put_record(&note).await
    }

    async fn delete_note(&self, id: &str) -> Result<()> {
        self.delete_doc(id).await
    }

    async fn list_notes(&self) -> Result<Vec<NoteDoc>> {
        self.db
            .all_docs("")
            .await?
            .iter()
            .filter(|doc| is_note_id(&doc.id))
            .map(|doc| doc.to_record())
            .collect()
    }

    async fn notes_by_folder(&self, pathname: &str) -> Result<Vec<NoteDoc>> {
        self.query_notes("by_folder", pathname).await
    }

    async fn notes_by_tag(&self, name: &str) -> Result<Vec<NoteDoc>> {
        self.query_notes("by_tag", name).await
    }

    async fn put_attachments(&self, uploads: Vec<AttachmentUpload>) -> Result<Vec<Attachment>> {
        let mut stored = Vec::with_capacity(uploads.len());

        for upload in uploads {
            let name = sanitize_attachment_name(&upload.name)?;
            let mime_type = upload
                .mime_type
                .clone()
                .or_else(|| sniff_image_mime(&upload.data).map(str::to_string))
                .unwrap_or_else(|| DEFAULT_ATTACHMENT_MIME.to_string());

            let rev = self.db.get(ATTACHMENTS_DOC_ID).await?.and_then(|d| d.rev);
            let attachment = DocAttachment {
                content_type: mime_type.clone(),
                data: upload.data,
            };
            self.db
                .put_attachment(ATTACHMENTS_DOC_ID, rev.as_deref(), &name, attachment)
                .await?;
            debug!(attachment = %name, mime = %mime_type, "stored attachment");

            stored.push(self.attachment_handle(name, mime_type));
        }

        Ok(stored)
    }

    async fn delete_attachment(&self, name: &str) -> Result<()> {
        let rev = self
            .db
            .get(ATTACHMENTS_DOC_ID)
            .await?
            .and_then(|d| d.rev)
            .ok_or_else(|| StoreError::not_found(format!("attachment '{}'", name)))?;
        self.db
            .remove_attachment(ATTACHMENTS_DOC_ID, &rev, name)
            .await?;
        Ok(())
    }

    async fn list_attachments(&self) -> Result<Vec<Attachment>> {
        let Some(doc) = self.db.get(ATTACHMENTS_DOC_ID).await? else {
            return Ok(Vec::new());
        };
        Ok(doc
            .attachments
            .into_iter()
            .map(|(name, a)| self.attachment_handle(name, a.content_type))
            .collect())
    }
}
