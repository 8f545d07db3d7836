use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use super::backend::DocBackend;
use super::mime::{sniff_image_mime, SNIFF_LEN};
use super::sanitize_attachment_name;
use crate::error::{Result, StoreError};
use crate::ids::{is_note_file_stem, note_file_stem, note_id_from_file_stem};
use crate::model::{
    Attachment, AttachmentData, AttachmentSource, AttachmentUpload, BackendKind, FolderDoc,
    NoteDoc, TagDoc,
};

pub const SIDECAR_FILE: &str = "boostnote.json";
pub const NOTES_DIR: &str = "notes";
pub const ATTACHMENTS_DIR: &str = "attachments";

/// Contents of `boostnote.json`. Notes are not listed here; they are found by
/// listing `notes/`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Sidecar {
    #[serde(default)]
    folder_map: BTreeMap<String, FolderDoc>,
    #[serde(default)]
    tag_map: BTreeMap<String, TagDoc>,
}

/// Backend over a plain directory.
///
/// Every mutation rewrites a whole file through a temporary file and a
/// rename. Directories that disappear are recreated on the next write.
pub struct FsBackend {
    root: PathBuf,
    /// Loaded on first use.
    sidecar: Mutex<Option<Sidecar>>,
}

impl FsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sidecar: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn sidecar_path(&self) -> PathBuf {
        self.root.join(SIDECAR_FILE)
    }

    fn notes_dir(&self) -> PathBuf {
        self.root.join(NOTES_DIR)
    }

    fn attachments_dir(&self) -> PathBuf {
        self.root.join(ATTACHMENTS_DIR)
    }

    /// `None` for ids that do not map to a file inside `notes/`.
    fn note_path(&self, id: &str) -> Option<PathBuf> {
        note_file_stem(id).map(|stem| self.notes_dir().join(format!("{}.json", stem)))
    }

    async fn read_sidecar(&self) -> Result<Option<Sidecar>> {
        match tokio::fs::read(self.sidecar_path()).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_sidecar(&self, sidecar: &Sidecar) -> Result<()> {
        let content = serde_json::to_vec_pretty(sidecar)?;
        write_atomic(&self.root, &self.sidecar_path(), &content).await
    }

    async fn sidecar(&self) -> Result<MappedMutexGuard<'_, Sidecar>> {
        let mut guard = self.sidecar.lock().await;
        if guard.is_none() {
            *guard = Some(self.read_sidecar().await?.unwrap_or_default());
        }
        Ok(MutexGuard::map(guard, |s| s.get_or_insert_with(Sidecar::default)))
    }

    /// Apply `edit` to a copy of the sidecar, persist it, then keep it.
    async fn update_sidecar<F>(&self, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Sidecar) + Send,
    {
        let mut sidecar = self.sidecar().await?;
        let mut next = sidecar.clone();
        edit(&mut next);
        self.write_sidecar(&next).await?;
        *sidecar = next;
        Ok(())
    }

    async fn unique_attachment_name(&self, dir: &Path, name: &str) -> Result<String> {
        let millis = Utc::now().timestamp_millis();
        let candidate = format!("{}-{}", millis, name);
        if !tokio::fs::try_exists(dir.join(&candidate)).await? {
            return Ok(candidate);
        }

        let (stem, ext) = match name.rfind('.') {
            Some(idx) if idx > 0 => name.split_at(idx),
            _ => (name, ""),
        };
        let mut counter = 1;
        loop {
            let candidate = format!("{}-{}-{}{}", millis, stem, counter, ext);
            if !tokio::fs::try_exists(dir.join(&candidate)).await? {
                return Ok(candidate);
            }
            counter += 1;
        }
    }

    fn attachment_handle(&self, name: String, mime_type: &str) -> Attachment {
        let source = FileAttachmentSource {
            path: self.attachments_dir().join(&name),
        };
        Attachment::new(name, mime_type, Arc::new(source))
    }
}

pub(crate) async fn write_atomic(dir: &Path, target: &Path, content: &[u8]) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let tmp = dir.join(format!(".write-{}.tmp", Uuid::new_v4()));
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, target).await?;
    Ok(())
}

async fn sniff_file(path: &Path) -> Result<Option<&'static str>> {
    let file = tokio::fs::File::open(path).await?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64).read_to_end(&mut head).await?;
    Ok(sniff_image_mime(&head))
}

struct FileAttachmentSource {
    path: PathBuf,
}

#[async_trait]
impl AttachmentSource for FileAttachmentSource {
    async fn load(&self) -> Result<AttachmentData> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Err(StoreError::not_found(format!(
                "attachment '{}'",
                self.path.display()
            )));
        }
        Ok(AttachmentData::Uri(format!("file://{}", self.path.display())))
    }
}

#[async_trait]
impl DocBackend for FsBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::FileSystem
    }

    async fn prepare(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.notes_dir()).await?;
        tokio::fs::create_dir_all(self.attachments_dir()).await?;

        let mut guard = self.sidecar.lock().await;
        let sidecar = match self.read_sidecar().await? {
            Some(sidecar) => sidecar,
            None => {
                let sidecar = Sidecar::default();
                self.write_sidecar(&sidecar).await?;
                debug!(root = %self.root.display(), "created {}", SIDECAR_FILE);
                sidecar
            }
        };
        *guard = Some(sidecar);
        Ok(())
    }

    async fn load_folder(&self, pathname: &str) -> Result<Option<FolderDoc>> {
        Ok(self.sidecar().await?.folder_map.get(pathname).cloned())
    }

    async fn put_folder(&self, folder: FolderDoc) -> Result<FolderDoc> {
        let stored = folder.clone();
        self.update_sidecar(move |s| {
            s.folder_map.insert(folder.pathname().to_string(), folder);
        })
        .await?;
        Ok(stored)
    }

    async fn delete_folder(&self, pathname: &str) -> Result<()> {
        if !self.sidecar().await?.folder_map.contains_key(pathname) {
            return Ok(());
        }
        let key = pathname.to_string();
        self.update_sidecar(move |s| {
            s.folder_map.remove(&key);
        })
        .await
    }

    async fn list_folders(&self) -> Result<Vec<FolderDoc>> {
        Ok(self.sidecar().await?.folder_map.values().cloned().collect())
    }

    async fn load_tag(&self, name: &str) -> Result<Option<TagDoc>> {
        Ok(self.sidecar().await?.tag_map.get(name).cloned())
    }

    async fn put_tag(&self, tag: TagDoc) -> Result<TagDoc> {
        let stored = tag.clone();
        self.update_sidecar(move |s| {
            s.tag_map.insert(tag.name().to_string(), tag);
        })
        .await?;
        Ok(stored)
    }

    async fn delete_tag(&self, name: &str) -> Result<()> {
        if !self.sidecar().await?.tag_map.contains_key(name) {
            return Ok(());
        }
        let key = name.to_string();
        self.update_sidecar(move |s| {
            s.tag_map.remove(&key);
        })
        .await
    }

    async fn list_tags(&self) -> Result<Vec<TagDoc>> {
        Ok(self.sidecar().await?.tag_map.values().cloned().collect())
    }

    async fn load_note(&self, id: &str) -> Result<Option<NoteDoc>> {
        let Some(path) = self.note_path(id) else {
            return Ok(None);
        };
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_note(&self, mut note: NoteDoc) -> Result<NoteDoc> {
        note.rev = None;
        let path = self
            .note_path(&note.id)
            .ok_or_else(|| StoreError::unprocessable(format!("invalid note id '{}'", note.id)))?;
        let content = serde_json::to_vec_pretty(&note)?;
        write_atomic(&self.notes_dir(), &path, &content).await?;
        Ok(note)
    }

    async fn delete_note(&self, id: &str) -> Result<()> {
        let Some(path) = self.note_path(id) else {
            return Ok(());
        };
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_notes(&self) -> Result<Vec<NoteDoc>> {
        let mut entries = match tokio::fs::read_dir(self.notes_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut notes = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            if !is_note_file_stem(stem) {
                debug!(file = %name, "skipping file that is not a note");
                continue;
            }

            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<NoteDoc>(&bytes) {
                Ok(note) => notes.push(note),
                Err(e) => {
                    warn!(
                        note = %note_id_from_file_stem(stem),
                        error = %e,
                        "skipping unreadable note file"
                    );
                }
            }
        }
        Ok(notes)
    }

    async fn put_attachments(&self, uploads: Vec<AttachmentUpload>) -> Result<Vec<Attachment>> {
        let dir = self.attachments_dir();
        tokio::fs::create_dir_all(&dir).await?;

        let mut stored = Vec::with_capacity(uploads.len());
        for upload in uploads {
            let name = sanitize_attachment_name(&upload.name)?;
            let mime_type = sniff_image_mime(&upload.data).ok_or_else(|| {
                StoreError::unprocessable(format!("attachment '{}' is not an image", name))
            })?;

            let file_name = self.unique_attachment_name(&dir, &name).await?;
            write_atomic(&dir, &dir.join(&file_name), &upload.data).await?;
            debug!(attachment = %file_name, mime = %mime_type, "stored attachment");

            stored.push(self.attachment_handle(file_name, mime_type));
        }
        Ok(stored)
    }

    async fn delete_attachment(&self, name: &str) -> Result<()> {
        let name = sanitize_attachment_name(name)?;
        match tokio::fs::remove_file(self.attachments_dir().join(&name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::not_found(format!("attachment '{}'", name)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_attachments(&self) -> Result<Vec<Attachment>> {
        let mut entries = match tokio::fs::read_dir(self.attachments_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut attachments = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            match sniff_file(&path).await? {
                Some(mime_type) => attachments.push(self.attachment_handle(name.to_string(), mime_type)),
                None => debug!(file = %name, "skipping non-image attachment"),
            }
        }
        attachments.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(attachments)
    }
}
