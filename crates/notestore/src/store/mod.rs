//! # Storage Layer
//!
//! This module defines the backend contract every storage medium satisfies.
//! The [`NoteBackend`] trait is what the index layer and the API talk to.
//!
//! ## Two Traits
//!
//! The contract is split the same way for every medium:
//! 1. **[`backend::DocBackend`]**: raw document I/O (load/put/delete/list),
//!    one implementation per medium.
//! 2. **[`NoteBackend`]**: the operations with real semantics (validation,
//!    folder chains, cascading rename and removal, untrash recovery),
//!    implemented once by [`note_store::NoteStore`] over any `DocBackend`.
//!
//! Because validation and cascades live in one place, both media reject the
//! same inputs with the same errors and leave the same documents behind.
//!
//! ## Invariants
//!
//! - Every ancestor of a folder record also has a record; `/` always exists
//!   after `init`.
//! - Every folder pathname and tag name referenced by a non-trashed note has a
//!   record. Mutations restore this eagerly; `init` repairs it for data
//!   written by other tools (see [`ReconcileReport`]). Stale records are never
//!   removed.
//! - Trash is reversible (`trashed = true`); purge is the only hard delete.
//!
//! ## Composite Operations
//!
//! `rename_folder`, `remove_folder` and `remove_tag` are executed as
//! [`plan::Plan`]s of single-document writes. They are not transactional: an
//! I/O failure part way through leaves the steps before it applied.
//!
//! ## Implementations
//!
//! - [`replicated::ReplicatedBackend`]: revision-tracked document database
//!   with views, a singleton attachments document, and remote replication.
//! - [`fs_backend::FsBackend`]: a plain directory.
//!
//! ## Filesystem Layout
//!
//! ```text
//! <storage>/
//! ├── boostnote.json        # {folderMap, tagMap}
//! ├── notes/
//! │   └── <idWithoutPrefix>.json
//! └── attachments/
//!     └── <millis>-<filename>
//! ```

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::{Result, StoreError};
use crate::model::{
    AllDocsMap, Attachment, AttachmentUpload, BackendKind, FolderDoc, FolderProps, NewNote,
    NoteDoc, NoteUpdate, TagDoc, TagProps,
};

pub mod backend;
pub mod docdb;
pub mod fs_backend;
pub mod mime;
pub mod note_store;
pub mod plan;
pub mod replicated;
pub mod sqlite;

pub use fs_backend::FsBackend;
pub use note_store::NoteStore;
pub use replicated::ReplicatedBackend;

/// Strips any directory part from an uploaded file name.
pub(crate) fn sanitize_attachment_name(name: &str) -> Result<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    if base.is_empty() || base == "." || base == ".." || base.chars().any(char::is_control) {
        return Err(StoreError::unprocessable(format!(
            "invalid attachment name '{}'",
            name
        )));
    }
    Ok(base.to_string())
}

/// Records created by the reconciliation pass at `init`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created_folders: Vec<String>,
    pub created_tags: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.created_folders.is_empty() && self.created_tags.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenameFolderOutcome {
    /// Every folder written: newly created parents of the destination, then
    /// the rebased subtree.
    pub folders: Vec<FolderDoc>,
    /// Notes rewritten with the rebased pathname.
    pub notes: Vec<NoteDoc>,
    /// Old pathnames, deepest first.
    pub removed_pathnames: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoveFolderOutcome {
    pub trashed_notes: Vec<NoteDoc>,
    /// Deepest first.
    pub removed_pathnames: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoveTagOutcome {
    pub updated_notes: Vec<NoteDoc>,
}

/// The contract every storage backend satisfies.
///
/// Lookups return `Ok(None)` for absent documents; only mutations of absent
/// notes and folders fail with `NotFound`. Invalid pathnames and tag names
/// fail with `UnprocessableEntity` before anything is written.
#[async_trait]
pub trait NoteBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Prepare the medium and run the reconciliation pass.
    async fn init(&self) -> Result<ReconcileReport>;

    // --- Folders ---

    async fn get_folder(&self, pathname: &str) -> Result<Option<FolderDoc>>;

    /// Create the folder and any missing ancestors. An existing folder with
    /// no props is returned untouched.
    async fn upsert_folder(&self, pathname: &str, props: Option<FolderProps>)
        -> Result<FolderDoc>;

    async fn rename_folder(&self, old: &str, new: &str) -> Result<RenameFolderOutcome>;

    /// Trash every note in the subtree, then delete the subtree's records.
    async fn remove_folder(&self, pathname: &str) -> Result<RemoveFolderOutcome>;

    // --- Tags ---

    async fn get_tag(&self, name: &str) -> Result<Option<TagDoc>>;

    async fn upsert_tag(&self, name: &str, props: Option<TagProps>) -> Result<TagDoc>;

    /// Strip the tag from every note holding it, trashed notes included,
    /// then delete its record.
    async fn remove_tag(&self, name: &str) -> Result<RemoveTagOutcome>;

    // --- Notes ---

    async fn get_note(&self, id: &str) -> Result<Option<NoteDoc>>;

    async fn find_notes_by_folder(&self, pathname: &str) -> Result<Vec<NoteDoc>>;

    async fn find_notes_by_tag(&self, name: &str) -> Result<Vec<NoteDoc>>;

    async fn create_note(&self, props: NewNote) -> Result<NoteDoc>;

    async fn update_note(&self, id: &str, update: NoteUpdate) -> Result<NoteDoc>;

    async fn trash_note(&self, id: &str) -> Result<NoteDoc>;

    /// Restores the note, recreating its folder chain and tags if they were
    /// removed while it sat in the trash.
    async fn untrash_note(&self, id: &str) -> Result<NoteDoc>;

    async fn purge_note(&self, id: &str) -> Result<()>;

    /// Full canonical content. Load and export only.
    async fn get_all_docs_map(&self) -> Result<AllDocsMap>;

    // --- Attachments ---

    async fn upsert_attachments(&self, files: Vec<AttachmentUpload>) -> Result<Vec<Attachment>>;

    async fn remove_attachment(&self, name: &str) -> Result<()>;

    async fn get_attachment_map(&self) -> Result<HashMap<String, Attachment>>;
}
