use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

use super::backend::DocBackend;
use super::plan::{Plan, PlanStep};
use super::{
    NoteBackend, ReconcileReport, RemoveFolderOutcome, RemoveTagOutcome, RenameFolderOutcome,
};
use crate::error::{Result, StoreError};
use crate::folders::pathname::depth;
use crate::folders::{
    check_folder_pathname, is_in_subtree, parent_pathname, pathname_chain, rebase_pathname,
    validate_folder_pathname, ROOT_PATHNAME,
};
use crate::ids::generate_note_id;
use crate::model::{
    AllDocsMap, Attachment, AttachmentUpload, BackendKind, FolderDoc, FolderProps, NewNote,
    NoteDoc, NoteUpdate, TagDoc, TagProps,
};
use crate::tags::{normalize_tag_list, validate_tag_name};

/// The backend contract, implemented once over any raw document medium.
pub struct NoteStore<B: DocBackend> {
    /// The underlying document backend.
    /// Exposed as pub(crate) for testing and internal access only.
    pub(crate) backend: B,
}

impl<B: DocBackend> NoteStore<B> {
    pub fn with_backend(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Recreate missing folder and tag records referenced by non-trashed
    /// notes. Never removes records that no note uses anymore.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        if self.backend.load_folder(ROOT_PATHNAME).await?.is_none() {
            self.backend
                .put_folder(FolderDoc::new(ROOT_PATHNAME, Utc::now()))
                .await?;
            report.created_folders.push(ROOT_PATHNAME.to_string());
        }

        let mut pathnames = BTreeSet::new();
        let mut tags = BTreeSet::new();
        for note in self.backend.list_notes().await? {
            if note.trashed {
                continue;
            }
            pathnames.insert(note.folder_pathname);
            tags.extend(note.tags);
        }

        for pathname in pathnames {
            for folder in self.ensure_folder_chain(&pathname).await? {
                report.created_folders.push(folder.pathname().to_string());
            }
        }
        let tags: Vec<String> = tags.into_iter().collect();
        for tag in self.ensure_tags(&tags).await? {
            report.created_tags.push(tag.name().to_string());
        }

        if !report.is_clean() {
            info!(
                folders = report.created_folders.len(),
                tags = report.created_tags.len(),
                "reconciliation recreated missing records"
            );
        }
        Ok(report)
    }

    /// Create every missing folder on the chain from `/` down to `pathname`.
    /// Returns the folders that were created. Invalid pathnames found in
    /// stored notes are skipped.
    async fn ensure_folder_chain(&self, pathname: &str) -> Result<Vec<FolderDoc>> {
        if let Err(e) = validate_folder_pathname(pathname) {
            warn!(pathname = %pathname, error = %e, "skipping invalid folder pathname");
            return Ok(Vec::new());
        }

        let mut created = Vec::new();
        for p in pathname_chain(pathname) {
            if self.backend.load_folder(&p).await?.is_none() {
                let folder = self
                    .backend
                    .put_folder(FolderDoc::new(&p, Utc::now()))
                    .await?;
                debug!(pathname = %p, "created folder");
                created.push(folder);
            }
        }
        Ok(created)
    }

    async fn ensure_tags(&self, tags: &[String]) -> Result<Vec<TagDoc>> {
        let mut created = Vec::new();
        for name in tags {
            if let Err(e) = validate_tag_name(name) {
                warn!(tag = %name, error = %e, "skipping invalid tag name");
                continue;
            }
            if self.backend.load_tag(name).await?.is_none() {
                let tag = self.backend.put_tag(TagDoc::new(name, Utc::now())).await?;
                debug!(tag = %name, "created tag");
                created.push(tag);
            }
        }
        Ok(created)
    }

    async fn require_note(&self, id: &str) -> Result<NoteDoc> {
        self.backend
            .load_note(id)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("note '{}'", id)))
    }

    /// Every step `rename_folder(old, new)` would take, after all checks.
    pub async fn rename_folder_plan(&self, old: &str, new: &str) -> Result<Plan> {
        check_folder_pathname(old)?;
        check_folder_pathname(new)?;
        if old == ROOT_PATHNAME {
            return Err(StoreError::unprocessable("the root folder cannot be renamed"));
        }
        if is_in_subtree(new, old) {
            return Err(StoreError::unprocessable(format!(
                "cannot move folder '{}' into its own subtree '{}'",
                old, new
            )));
        }
        if self.backend.load_folder(new).await?.is_some() {
            return Err(StoreError::unprocessable(format!(
                "folder '{}' already exists",
                new
            )));
        }
        if self.backend.load_folder(old).await?.is_none() {
            return Err(StoreError::not_found(format!("folder '{}'", old)));
        }

        let now = Utc::now();
        let mut plan = Plan::new();

        if let Some(parent) = parent_pathname(new) {
            for p in pathname_chain(&parent) {
                if self.backend.load_folder(&p).await?.is_none() {
                    plan.push(PlanStep::PutFolder(FolderDoc::new(&p, now)));
                }
            }
        }

        let mut subtree: Vec<FolderDoc> = self
            .backend
            .list_folders()
            .await?
            .into_iter()
            .filter(|f| is_in_subtree(f.pathname(), old))
            .collect();
        subtree.sort_by(|a, b| {
            depth(a.pathname())
                .cmp(&depth(b.pathname()))
                .then_with(|| a.pathname().cmp(b.pathname()))
        });
        for folder in &subtree {
            let target = rebase_pathname(folder.pathname(), old, new);
            plan.push(PlanStep::PutFolder(folder.moved_to(&target)));
        }

        let mut notes: Vec<NoteDoc> = self
            .backend
            .list_notes()
            .await?
            .into_iter()
            .filter(|n| is_in_subtree(&n.folder_pathname, old))
            .collect();
        notes.sort_by(|a, b| a.id.cmp(&b.id));
        for mut note in notes {
            note.folder_pathname = rebase_pathname(&note.folder_pathname, old, new);
            note.updated_at = now;
            plan.push(PlanStep::PutNote(note));
        }

        for folder in subtree.iter().rev() {
            plan.push(PlanStep::DeleteFolder(folder.pathname().to_string()));
        }

        Ok(plan)
    }

    /// Every step `remove_folder(pathname)` would take, after all checks.
    pub async fn remove_folder_plan(&self, pathname: &str) -> Result<Plan> {
        check_folder_pathname(pathname)?;
        if pathname == ROOT_PATHNAME {
            return Err(StoreError::unprocessable("the root folder cannot be removed"));
        }
        if self.backend.load_folder(pathname).await?.is_none() {
            return Err(StoreError::not_found(format!("folder '{}'", pathname)));
        }

        let now = Utc::now();
        let mut plan = Plan::new();

        let mut notes: Vec<NoteDoc> = self
            .backend
            .list_notes()
            .await?
            .into_iter()
            .filter(|n| !n.trashed && is_in_subtree(&n.folder_pathname, pathname))
            .collect();
        notes.sort_by(|a, b| a.id.cmp(&b.id));
        for mut note in notes {
            note.trashed = true;
            note.updated_at = now;
            plan.push(PlanStep::PutNote(note));
        }

        let mut subtree: Vec<String> = self
            .backend
            .list_folders()
            .await?
            .iter()
            .map(|f| f.pathname().to_string())
            .filter(|p| is_in_subtree(p, pathname))
            .collect();
        subtree.sort_by(|a, b| depth(b).cmp(&depth(a)).then_with(|| a.cmp(b)));
        for p in subtree {
            plan.push(PlanStep::DeleteFolder(p));
        }

        Ok(plan)
    }

    /// Every step `remove_tag(name)` would take, after all checks.
    pub async fn remove_tag_plan(&self, name: &str) -> Result<Plan> {
        validate_tag_name(name)
            .map_err(|e| StoreError::unprocessable(format!("invalid tag '{}': {}", name, e)))?;
        if self.backend.load_tag(name).await?.is_none() {
            return Err(StoreError::not_found(format!("tag '{}'", name)));
        }

        let now = Utc::now();
        let mut plan = Plan::new();

        let mut notes = self.backend.notes_by_tag(name).await?;
        notes.sort_by(|a, b| a.id.cmp(&b.id));
        for mut note in notes {
            note.tags.retain(|t| t != name);
            note.updated_at = now;
            plan.push(PlanStep::PutNote(note));
        }
        plan.push(PlanStep::DeleteTag(name.to_string()));

        Ok(plan)
    }
}

#[async_trait]
impl<B: DocBackend> NoteBackend for NoteStore<B> {
    fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    async fn init(&self) -> Result<ReconcileReport> {
        self.backend.prepare().await?;
        self.reconcile().await
    }

    async fn get_folder(&self, pathname: &str) -> Result<Option<FolderDoc>> {
        self.backend.load_folder(pathname).await
    }

    async fn upsert_folder(
        &self,
        pathname: &str,
        props: Option<FolderProps>,
    ) -> Result<FolderDoc> {
        check_folder_pathname(pathname)?;
        if let Some(parent) = parent_pathname(pathname) {
            self.ensure_folder_chain(&parent).await?;
        }

        let now = Utc::now();
        match (self.backend.load_folder(pathname).await?, props) {
            (Some(existing), None) => Ok(existing),
            (Some(mut existing), Some(props)) => {
                existing.data.extend(props.data);
                existing.updated_at = now;
                self.backend.put_folder(existing).await
            }
            (None, props) => {
                let mut folder = FolderDoc::new(pathname, now);
                if let Some(props) = props {
                    folder.data = props.data;
                }
                debug!(pathname = %pathname, "created folder");
                self.backend.put_folder(folder).await
            }
        }
    }

    async fn rename_folder(&self, old: &str, new: &str) -> Result<RenameFolderOutcome> {
        let plan = self.rename_folder_plan(old, new).await?;
        let outcome = plan.execute(&self.backend).await?;
        info!(from = %old, to = %new, notes = outcome.notes.len(), "renamed folder");

        Ok(RenameFolderOutcome {
            folders: outcome.folders,
            notes: outcome.notes,
            removed_pathnames: outcome.deleted_folders,
        })
    }

    async fn remove_folder(&self, pathname: &str) -> Result<RemoveFolderOutcome> {
        let plan = self.remove_folder_plan(pathname).await?;
        let outcome = plan.execute(&self.backend).await?;
        info!(
            pathname = %pathname,
            trashed = outcome.notes.len(),
            folders = outcome.deleted_folders.len(),
            "removed folder"
        );

        Ok(RemoveFolderOutcome {
            trashed_notes: outcome.notes,
            removed_pathnames: outcome.deleted_folders,
        })
    }

    async fn get_tag(&self, name: &str) -> Result<Option<TagDoc>> {
        self.backend.load_tag(name).await
    }

    async fn upsert_tag(&self, name: &str, props: Option<TagProps>) -> Result<TagDoc> {
        validate_tag_name(name)
            .map_err(|e| StoreError::unprocessable(format!("invalid tag '{}': {}", name, e)))?;

        let now = Utc::now();
        match (self.backend.load_tag(name).await?, props) {
            (Some(existing), None) => Ok(existing),
            (Some(mut existing), Some(props)) => {
                existing.data.extend(props.data);
                existing.updated_at = now;
                self.backend.put_tag(existing).await
            }
            (None, props) => {
                let mut tag = TagDoc::new(name, now);
                if let Some(props) = props {
                    tag.data = props.data;
                }
                self.backend.put_tag(tag).await
            }
        }
    }

    async fn remove_tag(&self, name: &str) -> Result<RemoveTagOutcome> {
        let plan = self.remove_tag_plan(name).await?;
        let outcome = plan.execute(&self.backend).await?;
        info!(tag = %name, notes = outcome.notes.len(), "removed tag");

        Ok(RemoveTagOutcome {
            updated_notes: outcome.notes,
        })
    }

    async fn get_note(&self, id: &str) -> Result<Option<NoteDoc>> {
        self.backend.load_note(id).await
    }

    async fn find_notes_by_folder(&self, pathname: &str) -> Result<Vec<NoteDoc>> {
        self.backend.notes_by_folder(pathname).await
    }

    async fn find_notes_by_tag(&self, name: &str) -> Result<Vec<NoteDoc>> {
        self.backend.notes_by_tag(name).await
    }

    async fn create_note(&self, props: NewNote) -> Result<NoteDoc> {
        let pathname = props.folder_pathname_or_root().to_string();
        check_folder_pathname(&pathname)?;
        let tags = normalize_tag_list(props.tags.as_deref().unwrap_or_default())?;

        self.ensure_folder_chain(&pathname).await?;
        self.ensure_tags(&tags).await?;

        let now = Utc::now();
        let note = NoteDoc {
            id: generate_note_id(),
            title: props.title.unwrap_or_default(),
            content: props.content.unwrap_or_default(),
            tags,
            folder_pathname: pathname,
            data: props.data.unwrap_or_default(),
            created_at: now,
            updated_at: now,
            trashed: false,
            archived_at: None,
            rev: None,
        };

        let note = self.backend.put_note(note).await?;
        info!(note = %note.id, folder = %note.folder_pathname, "created note");
        Ok(note)
    }

    async fn update_note(&self, id: &str, update: NoteUpdate) -> Result<NoteDoc> {
        let mut note = self.require_note(id).await?;

        if let Some(pathname) = &update.folder_pathname {
            check_folder_pathname(pathname)?;
        }
        let tags = match &update.tags {
            Some(tags) => Some(normalize_tag_list(tags)?),
            None => None,
        };

        if let Some(pathname) = update.folder_pathname {
            self.ensure_folder_chain(&pathname).await?;
            note.folder_pathname = pathname;
        }
        if let Some(tags) = tags {
            self.ensure_tags(&tags).await?;
            note.tags = tags;
        }
        if let Some(title) = update.title {
            note.title = title;
        }
        if let Some(content) = update.content {
            note.content = content;
        }
        if let Some(data) = update.data {
            note.data = data;
        }
        if let Some(archived_at) = update.archived_at {
            note.archived_at = archived_at;
        }
        note.updated_at = Utc::now();

        let note = self.backend.put_note(note).await?;
        debug!(note = %note.id, "updated note");
        Ok(note)
    }

    async fn trash_note(&self, id: &str) -> Result<NoteDoc> {
        let mut note = self.require_note(id).await?;
        note.trashed = true;
        note.updated_at = Utc::now();

        let note = self.backend.put_note(note).await?;
        debug!(note = %note.id, "trashed note");
        Ok(note)
    }

    async fn untrash_note(&self, id: &str) -> Result<NoteDoc> {
        let mut note = self.require_note(id).await?;

        let folders = self.ensure_folder_chain(&note.folder_pathname).await?;
        let tags = self.ensure_tags(&note.tags).await?;
        if !folders.is_empty() || !tags.is_empty() {
            info!(
                note = %note.id,
                folders = folders.len(),
                tags = tags.len(),
                "recreated records removed while note was trashed"
            );
        }

        note.trashed = false;
        note.updated_at = Utc::now();
        let note = self.backend.put_note(note).await?;
        debug!(note = %note.id, "restored note");
        Ok(note)
    }

    async fn purge_note(&self, id: &str) -> Result<()> {
        let note = self.require_note(id).await?;
        self.backend.delete_note(&note.id).await?;
        info!(note = %id, "purged note");
        Ok(())
    }

    async fn get_all_docs_map(&self) -> Result<AllDocsMap> {
        let note_map = self
            .backend
            .list_notes()
            .await?
            .into_iter()
            .map(|n| (n.id.clone(), n))
            .collect();
        let folder_map = self
            .backend
            .list_folders()
            .await?
            .into_iter()
            .map(|f| (f.pathname().to_string(), f))
            .collect();
        let tag_map = self
            .backend
            .list_tags()
            .await?
            .into_iter()
            .map(|t| (t.name().to_string(), t))
            .collect();

        Ok(AllDocsMap {
            note_map,
            folder_map,
            tag_map,
        })
    }

    async fn upsert_attachments(&self, files: Vec<AttachmentUpload>) -> Result<Vec<Attachment>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }
        let stored = self.backend.put_attachments(files).await?;
        debug!(count = stored.len(), "stored attachments");
        Ok(stored)
    }

    async fn remove_attachment(&self, name: &str) -> Result<()> {
        self.backend.delete_attachment(name).await
    }

    async fn get_attachment_map(&self) -> Result<HashMap<String, Attachment>> {
        Ok(self
            .backend
            .list_attachments()
            .await?
            .into_iter()
            .map(|a| (a.name.clone(), a))
            .collect())
    }
}
