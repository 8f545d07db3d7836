//! # Domain Model
//!
//! This module defines the documents the engine stores: [`NoteDoc`],
//! [`FolderDoc`], [`TagDoc`], and attachments, plus the input types for
//! creating and editing them.
//!
//! ## Documents
//!
//! All three document kinds share one id space, distinguished by prefix (see
//! [`crate::ids`]). Documents serialize camelCase with `_id` / `_rev`, which
//! is the exact shape written to `notes/<id>.json` and `boostnote.json` by
//! the filesystem backend and stored in the replicated document database.
//!
//! ```text
//! {
//!   "_id": "note:0c6a…",
//!   "title": "Groceries",
//!   "content": "- milk",
//!   "tags": ["home"],
//!   "folderPathname": "/errands",
//!   "data": { "bookmarked": true },
//!   "createdAt": "2024-03-01T10:00:00Z",
//!   "updatedAt": "2024-03-01T10:05:00Z",
//!   "trashed": false,
//!   "_rev": "3-9f2e…"
//! }
//! ```
//!
//! ## Revision Tokens
//!
//! `_rev` is owned by the backend. The replicated backend issues a new one on
//! every write and rejects writes carrying a stale one; the filesystem backend
//! never sets it.
//!
//! ## Attachments
//!
//! An [`Attachment`] never holds its bytes. It carries a lazy source that
//! resolves to [`AttachmentData::Blob`] (bytes read from the database on
//! demand) or [`AttachmentData::Uri`] (a `file://` URI the UI can load).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::folders::ROOT_PATHNAME;
use crate::ids;

pub type JsonMap = serde_json::Map<String, serde_json::Value>;

pub const BOOKMARKED_KEY: &str = "bookmarked";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Revision-tracked document database that can sync with a remote.
    Replicated,
    /// Plain directory of JSON files.
    #[serde(rename = "fs")]
    FileSystem,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteDoc {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub folder_pathname: String,
    #[serde(default)]
    pub data: JsonMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub trashed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
}

impl NoteDoc {
    pub fn is_bookmarked(&self) -> bool {
        self.data
            .get(BOOKMARKED_KEY)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.iter().any(|t| t == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderDoc {
    #[serde(rename = "_id")]
    pub id: String,
    /// Identity that survives renames. Only the replicated backend assigns it.
    #[serde(rename = "_realId", default, skip_serializing_if = "Option::is_none")]
    pub real_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub data: JsonMap,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
}

impl FolderDoc {
    pub fn new(pathname: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: ids::folder_id(pathname),
            real_id: None,
            created_at: now,
            updated_at: now,
            data: JsonMap::new(),
            rev: None,
        }
    }

    pub fn pathname(&self) -> &str {
        ids::pathname_from_folder_id(&self.id).unwrap_or(&self.id)
    }

    /// Copy of this folder living at another pathname, ready to be written as
    /// a fresh document.
    pub fn moved_to(&self, pathname: &str) -> Self {
        Self {
            id: ids::folder_id(pathname),
            rev: None,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagDoc {
    #[serde(rename = "_id")]
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub data: JsonMap,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
}

impl TagDoc {
    pub fn new(name: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: ids::tag_id(name),
            created_at: now,
            updated_at: now,
            data: JsonMap::new(),
            rev: None,
        }
    }

    pub fn name(&self) -> &str {
        ids::tag_name_from_id(&self.id).unwrap_or(&self.id)
    }
}

/// Input for creating a note. Everything is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNote {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub folder_pathname: Option<String>,
    pub data: Option<JsonMap>,
}

impl NewNote {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn in_folder(mut self, pathname: impl Into<String>) -> Self {
        self.folder_pathname = Some(pathname.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_data(mut self, data: JsonMap) -> Self {
        self.data = Some(data);
        self
    }

    pub(crate) fn folder_pathname_or_root(&self) -> &str {
        self.folder_pathname.as_deref().unwrap_or(ROOT_PATHNAME)
    }
}

/// Partial edit of a note. `None` leaves the field as it is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub folder_pathname: Option<String>,
    /// Replaces the whole data bag.
    pub data: Option<JsonMap>,
    /// `Some(None)` clears the archive stamp.
    pub archived_at: Option<Option<DateTime<Utc>>>,
}

impl NoteUpdate {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn move_to(pathname: impl Into<String>) -> Self {
        Self {
            folder_pathname: Some(pathname.into()),
            ..Default::default()
        }
    }

    pub fn set_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: Some(tags.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == NoteUpdate::default()
    }
}

/// Properties merged into a folder or tag on upsert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocProps {
    /// Keys merged into the existing data bag.
    #[serde(default)]
    pub data: JsonMap,
}

impl DocProps {
    pub fn with_data(data: JsonMap) -> Self {
        Self { data }
    }
}

pub type FolderProps = DocProps;
pub type TagProps = DocProps;

/// Full canonical content of a backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllDocsMap {
    pub note_map: HashMap<String, NoteDoc>,
    /// Keyed by pathname.
    pub folder_map: HashMap<String, FolderDoc>,
    /// Keyed by tag name.
    pub tag_map: HashMap<String, TagDoc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentData {
    Blob(Vec<u8>),
    Uri(String),
}

/// Resolves the bytes (or a reference to them) of one stored attachment.
#[async_trait]
pub trait AttachmentSource: Send + Sync {
    async fn load(&self) -> Result<AttachmentData>;
}

#[derive(Clone)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    source: Arc<dyn AttachmentSource>,
}

impl Attachment {
    pub fn new(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        source: Arc<dyn AttachmentSource>,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            source,
        }
    }

    pub async fn get_data(&self) -> Result<AttachmentData> {
        self.source.load().await
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Attachment {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.mime_type == other.mime_type
    }
}

/// A file handed to `upsert_attachments`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentUpload {
    pub name: String,
    /// Sniffed from the content when absent.
    pub mime_type: Option<String>,
    pub data: Vec<u8>,
}

impl AttachmentUpload {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: None,
            data,
        }
    }
}
