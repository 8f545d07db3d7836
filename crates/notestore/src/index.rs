//! # Denormalized Index
//!
//! The UI reads a storage through a [`StorageSnapshot`]: the storage's notes,
//! folders, tags and attachments, with every folder and tag carrying the set
//! of notes that belong to it.
//!
//! ## Membership Sets
//!
//! - A [`PopulatedFolder`]'s `note_id_set` holds the ids of all non-trashed
//!   notes whose `folderPathname` is exactly the folder's pathname. Notes in
//!   subfolders are not counted.
//! - A [`PopulatedTag`]'s `note_id_set` holds the ids of all non-trashed notes
//!   whose tag list contains the tag's name.
//!
//! These sets exist only in memory. They are built from canonical data when a
//! storage loads and patched after every successful mutation.
//!
//! ## Copy-on-Write
//!
//! Every map sits behind an `Arc`. A [`SnapshotPatch`] starts from the
//! current snapshot and calls `Arc::make_mut` only on the maps it touches, so
//! a reader holding the previous snapshot never sees a half-applied change
//! and untouched maps are shared between the two.
//!
//! ```text
//! old snapshot ──► note_map ◄──┐
//!              ──► folder_map  │ shared
//!              ──► tag_map ◄───┼──── new snapshot
//! new snapshot ──► note_map'   │     (only note_map and
//!              ──► folder_map' ┘      folder_map changed)
//! ```
//!
//! ## Patch Rules
//!
//! `put_note(next)` compares `next` against the note currently in the
//! snapshot. Membership only counts while a note is not trashed, so:
//!
//! - the old folder and old tags lose the id if the old note was not trashed,
//! - the new folder and new tags gain it if the new note is not trashed,
//! - sets that end up unchanged are left alone.
//!
//! A folder or tag entry added by a patch is seeded from the note map, which
//! covers entries created lazily for notes that already point at them.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::folders::{parent_pathname, ROOT_PATHNAME};
use crate::model::{AllDocsMap, Attachment, FolderDoc, NoteDoc, TagDoc};

#[derive(Debug, Clone, PartialEq)]
pub struct PopulatedFolder {
    pub folder: FolderDoc,
    pub note_id_set: BTreeSet<String>,
}

impl PopulatedFolder {
    pub fn pathname(&self) -> &str {
        self.folder.pathname()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PopulatedTag {
    pub tag: TagDoc,
    pub note_id_set: BTreeSet<String>,
}

impl PopulatedTag {
    pub fn name(&self) -> &str {
        self.tag.name()
    }
}

/// Immutable view of one storage.
#[derive(Debug, Clone, Default)]
pub struct StorageSnapshot {
    pub note_map: Arc<HashMap<String, NoteDoc>>,
    /// Keyed by pathname.
    pub folder_map: Arc<HashMap<String, PopulatedFolder>>,
    /// Keyed by tag name.
    pub tag_map: Arc<HashMap<String, PopulatedTag>>,
    pub attachment_map: Arc<HashMap<String, Attachment>>,
}

fn folder_members<'a>(
    notes: impl Iterator<Item = &'a NoteDoc>,
    pathname: &str,
) -> BTreeSet<String> {
    notes
        .filter(|n| !n.trashed && n.folder_pathname == pathname)
        .map(|n| n.id.clone())
        .collect()
}

fn tag_members<'a>(notes: impl Iterator<Item = &'a NoteDoc>, name: &str) -> BTreeSet<String> {
    notes
        .filter(|n| !n.trashed && n.has_tag(name))
        .map(|n| n.id.clone())
        .collect()
}

impl StorageSnapshot {
    /// Build the full index from canonical data.
    pub fn build(docs: AllDocsMap, attachments: HashMap<String, Attachment>) -> Self {
        let mut folder_map: HashMap<String, PopulatedFolder> = docs
            .folder_map
            .into_iter()
            .map(|(pathname, folder)| {
                let populated = PopulatedFolder {
                    folder,
                    note_id_set: BTreeSet::new(),
                };
                (pathname, populated)
            })
            .collect();
        let mut tag_map: HashMap<String, PopulatedTag> = docs
            .tag_map
            .into_iter()
            .map(|(name, tag)| {
                let populated = PopulatedTag {
                    tag,
                    note_id_set: BTreeSet::new(),
                };
                (name, populated)
            })
            .collect();

        for note in docs.note_map.values().filter(|n| !n.trashed) {
            if let Some(folder) = folder_map.get_mut(&note.folder_pathname) {
                folder.note_id_set.insert(note.id.clone());
            }
            for name in &note.tags {
                if let Some(tag) = tag_map.get_mut(name) {
                    tag.note_id_set.insert(note.id.clone());
                }
            }
        }

        Self {
            note_map: Arc::new(docs.note_map),
            folder_map: Arc::new(folder_map),
            tag_map: Arc::new(tag_map),
            attachment_map: Arc::new(attachments),
        }
    }

    pub fn note(&self, id: &str) -> Option<&NoteDoc> {
        self.note_map.get(id)
    }

    pub fn folder(&self, pathname: &str) -> Option<&PopulatedFolder> {
        self.folder_map.get(pathname)
    }

    pub fn tag(&self, name: &str) -> Option<&PopulatedTag> {
        self.tag_map.get(name)
    }

    pub fn patch(&self) -> SnapshotPatch {
        SnapshotPatch { next: self.clone() }
    }

    /// Every way the snapshot disagrees with its own note map.
    pub fn verify(&self) -> Vec<IndexViolation> {
        let mut violations = Vec::new();

        let mut by_folder: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
        let mut by_tag: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
        for note in self.note_map.values().filter(|n| !n.trashed) {
            by_folder
                .entry(note.folder_pathname.as_str())
                .or_default()
                .insert(note.id.clone());
            for name in &note.tags {
                by_tag.entry(name.as_str()).or_default().insert(note.id.clone());
            }
        }

        let mut pathnames: Vec<&String> = self.folder_map.keys().collect();
        pathnames.sort();
        for pathname in pathnames {
            let actual = &self.folder_map[pathname].note_id_set;
            let expected = by_folder.get(pathname.as_str()).cloned().unwrap_or_default();
            if *actual != expected {
                violations.push(IndexViolation::FolderSetMismatch {
                    pathname: pathname.clone(),
                    missing: expected.difference(actual).cloned().collect(),
                    unexpected: actual.difference(&expected).cloned().collect(),
                });
            }
            if let Some(parent) = parent_pathname(pathname) {
                if !self.folder_map.contains_key(&parent) {
                    violations.push(IndexViolation::MissingParent {
                        pathname: pathname.clone(),
                    });
                }
            }
        }

        let mut names: Vec<&String> = self.tag_map.keys().collect();
        names.sort();
        for name in names {
            let actual = &self.tag_map[name].note_id_set;
            let expected = by_tag.get(name.as_str()).cloned().unwrap_or_default();
            if *actual != expected {
                violations.push(IndexViolation::TagSetMismatch {
                    name: name.clone(),
                    missing: expected.difference(actual).cloned().collect(),
                    unexpected: actual.difference(&expected).cloned().collect(),
                });
            }
        }

        for (pathname, ids) in &by_folder {
            if !self.folder_map.contains_key(*pathname) {
                violations.push(IndexViolation::MissingFolder {
                    pathname: pathname.to_string(),
                    note_ids: ids.iter().cloned().collect(),
                });
            }
        }
        for (name, ids) in &by_tag {
            if !self.tag_map.contains_key(*name) {
                violations.push(IndexViolation::MissingTag {
                    name: name.to_string(),
                    note_ids: ids.iter().cloned().collect(),
                });
            }
        }

        if !self.folder_map.contains_key(ROOT_PATHNAME) {
            violations.push(IndexViolation::MissingFolder {
                pathname: ROOT_PATHNAME.to_string(),
                note_ids: Vec::new(),
            });
        }

        violations
    }
}

/// A disagreement found by [`StorageSnapshot::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexViolation {
    FolderSetMismatch {
        pathname: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    TagSetMismatch {
        name: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    /// Non-trashed notes point at a folder with no entry.
    MissingFolder {
        pathname: String,
        note_ids: Vec<String>,
    },
    /// Non-trashed notes carry a tag with no entry.
    MissingTag {
        name: String,
        note_ids: Vec<String>,
    },
    MissingParent {
        pathname: String,
    },
}

impl fmt::Display for IndexViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexViolation::FolderSetMismatch {
                pathname,
                missing,
                unexpected,
            } => write!(
                f,
                "folder '{}' membership is off ({} missing, {} unexpected)",
                pathname,
                missing.len(),
                unexpected.len()
            ),
            IndexViolation::TagSetMismatch {
                name,
                missing,
                unexpected,
            } => write!(
                f,
                "tag '{}' membership is off ({} missing, {} unexpected)",
                name,
                missing.len(),
                unexpected.len()
            ),
            IndexViolation::MissingFolder { pathname, note_ids } => write!(
                f,
                "folder '{}' has no entry but {} note(s) use it",
                pathname,
                note_ids.len()
            ),
            IndexViolation::MissingTag { name, note_ids } => write!(
                f,
                "tag '{}' has no entry but {} note(s) use it",
                name,
                note_ids.len()
            ),
            IndexViolation::MissingParent { pathname } => {
                write!(f, "folder '{}' has no parent entry", pathname)
            }
        }
    }
}

/// Builder for the next snapshot. Nothing is visible until [`finish`] and
/// the caller publishes the result.
///
/// [`finish`]: SnapshotPatch::finish
#[derive(Debug)]
pub struct SnapshotPatch {
    next: StorageSnapshot,
}

impl SnapshotPatch {
    pub fn upsert_folder(&mut self, folder: FolderDoc) -> &mut Self {
        let pathname = folder.pathname().to_string();
        let folders = Arc::make_mut(&mut self.next.folder_map);
        match folders.get_mut(&pathname) {
            Some(existing) => existing.folder = folder,
            None => {
                let note_id_set = folder_members(self.next.note_map.values(), &pathname);
                folders.insert(pathname, PopulatedFolder { folder, note_id_set });
            }
        }
        self
    }

    pub fn remove_folder(&mut self, pathname: &str) -> &mut Self {
        if self.next.folder_map.contains_key(pathname) {
            Arc::make_mut(&mut self.next.folder_map).remove(pathname);
        }
        self
    }

    pub fn upsert_tag(&mut self, tag: TagDoc) -> &mut Self {
        let name = tag.name().to_string();
        let tags = Arc::make_mut(&mut self.next.tag_map);
        match tags.get_mut(&name) {
            Some(existing) => existing.tag = tag,
            None => {
                let note_id_set = tag_members(self.next.note_map.values(), &name);
                tags.insert(name, PopulatedTag { tag, note_id_set });
            }
        }
        self
    }

    pub fn remove_tag(&mut self, name: &str) -> &mut Self {
        if self.next.tag_map.contains_key(name) {
            Arc::make_mut(&mut self.next.tag_map).remove(name);
        }
        self
    }

    /// Insert or replace a note and move its id between membership sets.
    pub fn put_note(&mut self, note: NoteDoc) -> &mut Self {
        let id = note.id.clone();
        let (old_folder, old_tags) = match self.next.note_map.get(&id) {
            Some(prev) if !prev.trashed => (
                Some(prev.folder_pathname.clone()),
                prev.tags.iter().cloned().collect::<BTreeSet<_>>(),
            ),
            _ => (None, BTreeSet::new()),
        };
        let (new_folder, new_tags) = if note.trashed {
            (None, BTreeSet::new())
        } else {
            (
                Some(note.folder_pathname.clone()),
                note.tags.iter().cloned().collect::<BTreeSet<_>>(),
            )
        };

        Arc::make_mut(&mut self.next.note_map).insert(id.clone(), note);

        if old_folder != new_folder {
            if let Some(pathname) = old_folder {
                self.leave_folder(&pathname, &id);
            }
            if let Some(pathname) = new_folder {
                self.join_folder(&pathname, &id);
            }
        }
        for name in old_tags.difference(&new_tags) {
            self.leave_tag(name, &id);
        }
        for name in new_tags.difference(&old_tags) {
            self.join_tag(name, &id);
        }
        self
    }

    pub fn remove_note(&mut self, id: &str) -> &mut Self {
        if !self.next.note_map.contains_key(id) {
            return self;
        }
        let Some(prev) = Arc::make_mut(&mut self.next.note_map).remove(id) else {
            return self;
        };
        if !prev.trashed {
            self.leave_folder(&prev.folder_pathname, id);
            for name in &prev.tags {
                self.leave_tag(name, id);
            }
        }
        self
    }

    pub fn put_attachment(&mut self, attachment: Attachment) -> &mut Self {
        Arc::make_mut(&mut self.next.attachment_map).insert(attachment.name.clone(), attachment);
        self
    }

    pub fn remove_attachment(&mut self, name: &str) -> &mut Self {
        if self.next.attachment_map.contains_key(name) {
            Arc::make_mut(&mut self.next.attachment_map).remove(name);
        }
        self
    }

    pub fn finish(self) -> StorageSnapshot {
        self.next
    }

    fn join_folder(&mut self, pathname: &str, id: &str) {
        if self.next.folder_map.contains_key(pathname) {
            if let Some(f) = Arc::make_mut(&mut self.next.folder_map).get_mut(pathname) {
                f.note_id_set.insert(id.to_string());
            }
        }
    }

    fn leave_folder(&mut self, pathname: &str, id: &str) {
        let present = self
            .next
            .folder_map
            .get(pathname)
            .is_some_and(|f| f.note_id_set.contains(id));
        if present {
            if let Some(f) = Arc::make_mut(&mut self.next.folder_map).get_mut(pathname) {
                f.note_id_set.remove(id);
            }
        }
    }

    fn join_tag(&mut self, name: &str, id: &str) {
        if self.next.tag_map.contains_key(name) {
            if let Some(t) = Arc::make_mut(&mut self.next.tag_map).get_mut(name) {
                t.note_id_set.insert(id.to_string());
            }
        }
    }

    fn leave_tag(&mut self, name: &str, id: &str) {
        let present = self
            .next
            .tag_map
            .get(name)
            .is_some_and(|t| t.note_id_set.contains(id));
        if present {
            if let Some(t) = Arc::make_mut(&mut self.next.tag_map).get_mut(name) {
                t.note_id_set.remove(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn note(id: &str, folder: &str, tags: &[&str]) -> NoteDoc {
        let now = Utc::now();
        NoteDoc {
            id: id.to_string(),
            title: String::new(),
            content: String::new(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            folder_pathname: folder.to_string(),
            data: Default::default(),
            created_at: now,
            updated_at: now,
            trashed: false,
            archived_at: None,
            rev: None,
        }
    }

    fn docs(notes: Vec<NoteDoc>, folders: &[&str], tags: &[&str]) -> AllDocsMap {
        let now = Utc::now();
        AllDocsMap {
            note_map: notes.into_iter().map(|n| (n.id.clone(), n)).collect(),
            folder_map: folders
                .iter()
                .map(|p| (p.to_string(), FolderDoc::new(p, now)))
                .collect(),
            tag_map: tags
                .iter()
                .map(|t| (t.to_string(), TagDoc::new(t, now)))
                .collect(),
        }
    }

    fn ids(set: &BTreeSet<String>) -> Vec<&str> {
        set.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_build_counts_direct_non_trashed_members() {
        let mut trashed = note("note:3", "/a", &["t"]);
        trashed.trashed = true;
        let snapshot = StorageSnapshot::build(
            docs(
                vec![
                    note("note:1", "/a", &["t"]),
                    note("note:2", "/a/b", &[]),
                    trashed,
                ],
                &["/", "/a", "/a/b"],
                &["t"],
            ),
            HashMap::new(),
        );

        assert_eq!(ids(&snapshot.folder("/a").unwrap().note_id_set), vec!["note:1"]);
        assert_eq!(ids(&snapshot.folder("/a/b").unwrap().note_id_set), vec!["note:2"]);
        assert!(snapshot.folder("/").unwrap().note_id_set.is_empty());
        assert_eq!(ids(&snapshot.tag("t").unwrap().note_id_set), vec!["note:1"]);
        assert!(snapshot.verify().is_empty());
    }

    #[test]
    fn test_put_note_moves_between_folders_and_tags() {
        let snapshot = StorageSnapshot::build(
            docs(vec![note("note:1", "/a", &["x"])], &["/", "/a", "/b"], &["x", "y"]),
            HashMap::new(),
        );

        let mut patch = snapshot.patch();
        patch.put_note(note("note:1", "/b", &["y"]));
        let next = patch.finish();

        assert!(next.folder("/a").unwrap().note_id_set.is_empty());
        assert_eq!(ids(&next.folder("/b").unwrap().note_id_set), vec!["note:1"]);
        assert!(next.tag("x").unwrap().note_id_set.is_empty());
        assert_eq!(ids(&next.tag("y").unwrap().note_id_set), vec!["note:1"]);
        assert!(next.verify().is_empty());
    }

    #[test]
    fn test_trash_and_restore_toggle_membership() {
        let snapshot = StorageSnapshot::build(
            docs(vec![note("note:1", "/a", &["x"])], &["/", "/a"], &["x"]),
            HashMap::new(),
        );

        let mut trashed = note("note:1", "/a", &["x"]);
        trashed.trashed = true;
        let mut patch = snapshot.patch();
        patch.put_note(trashed);
        let after_trash = patch.finish();
        assert!(after_trash.folder("/a").unwrap().note_id_set.is_empty());
        assert!(after_trash.tag("x").unwrap().note_id_set.is_empty());

        let mut patch = after_trash.patch();
        patch.put_note(note("note:1", "/a", &["x"]));
        let restored = patch.finish();
        assert_eq!(ids(&restored.folder("/a").unwrap().note_id_set), vec!["note:1"]);
        assert!(restored.verify().is_empty());
    }

    #[test]
    fn test_previous_snapshot_is_untouched() {
        let snapshot = StorageSnapshot::build(
            docs(vec![note("note:1", "/a", &[])], &["/", "/a"], &[]),
            HashMap::new(),
        );

        let mut patch = snapshot.patch();
        patch.remove_note("note:1");
        let next = patch.finish();

        assert!(snapshot.note("note:1").is_some());
        assert_eq!(snapshot.folder("/a").unwrap().note_id_set.len(), 1);
        assert!(next.note("note:1").is_none());
        assert!(next.folder("/a").unwrap().note_id_set.is_empty());
        assert!(Arc::ptr_eq(&snapshot.tag_map, &next.tag_map));
        assert!(Arc::ptr_eq(&snapshot.attachment_map, &next.attachment_map));
    }

    #[test]
    fn test_new_folder_entry_is_seeded_from_notes() {
        let snapshot = StorageSnapshot::build(
            docs(vec![note("note:1", "/late", &[])], &["/"], &[]),
            HashMap::new(),
        );
        assert!(!snapshot.verify().is_empty());

        let mut patch = snapshot.patch();
        patch.upsert_folder(FolderDoc::new("/late", Utc::now()));
        let next = patch.finish();
        assert_eq!(ids(&next.folder("/late").unwrap().note_id_set), vec!["note:1"]);
        assert!(next.verify().is_empty());
    }

    #[test]
    fn test_verify_reports_drift() {
        let snapshot = StorageSnapshot::build(
            docs(vec![note("note:1", "/a", &["x"])], &["/", "/a"], &["x"]),
            HashMap::new(),
        );
        let mut broken = snapshot.clone();
        Arc::make_mut(&mut broken.folder_map)
            .get_mut("/a")
            .unwrap()
            .note_id_set
            .clear();
        Arc::make_mut(&mut broken.tag_map).remove("x");

        let violations = broken.verify();
        assert_eq!(violations.len(), 2);
        assert!(matches!(
            &violations[0],
            IndexViolation::FolderSetMismatch { pathname, missing, .. }
                if pathname == "/a" && missing == &vec!["note:1".to_string()]
        ));
        assert!(matches!(&violations[1], IndexViolation::MissingTag { name, .. } if name == "x"));
    }
}
