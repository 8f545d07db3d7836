//! Index verification and repair.
//!
//! The published index can drift from canonical data when a composite
//! operation fails part way, or when another tool edits the storage
//! directly. `doctor` re-runs the backend's reconciliation pass, rebuilds
//! the index from scratch, compares it with the published one, and
//! publishes the rebuilt index if anything differs.

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use tracing::{info, warn};

use crate::error::Result;
use crate::index::IndexViolation;
use crate::storage::NoteStorage;
use crate::store::ReconcileReport;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DoctorReport {
    /// Disagreements inside the published index.
    pub violations: Vec<IndexViolation>,
    /// Records the backend's reconciliation pass had to create.
    pub reconciled: ReconcileReport,
    /// Note ids whose indexed record differs from canonical data, or that
    /// exist on only one side.
    pub stale_notes: Vec<String>,
    pub stale_folders: Vec<String>,
    pub stale_tags: Vec<String>,
    pub stale_attachments: Vec<String>,
}

impl DoctorReport {
    pub fn is_healthy(&self) -> bool {
        self.violations.is_empty()
            && self.reconciled.is_clean()
            && self.stale_notes.is_empty()
            && self.stale_folders.is_empty()
            && self.stale_tags.is_empty()
            && self.stale_attachments.is_empty()
    }
}

pub async fn run(storage: &NoteStorage) -> Result<DoctorReport> {
    let _guard = storage.lock().await;
    let published = storage.snapshot();

    let reconciled = storage.backend().init().await?;
    let rebuilt = storage.rebuild().await?;

    let report = DoctorReport {
        violations: published.verify(),
        reconciled,
        stale_notes: diff_keys(&published.note_map, &rebuilt.note_map, |a, b| a == b),
        stale_folders: diff_keys(&published.folder_map, &rebuilt.folder_map, |a, b| {
            a.folder == b.folder
        }),
        stale_tags: diff_keys(&published.tag_map, &rebuilt.tag_map, |a, b| a.tag == b.tag),
        stale_attachments: diff_keys(&published.attachment_map, &rebuilt.attachment_map, |a, b| {
            a == b
        }),
    };

    if report.is_healthy() {
        info!(storage = %storage.id(), "Index is consistent");
    } else {
        warn!(
            storage = %storage.id(),
            violations = report.violations.len(),
            stale_notes = report.stale_notes.len(),
            stale_folders = report.stale_folders.len(),
            stale_tags = report.stale_tags.len(),
            "Index drift repaired"
        );
        storage.publish(rebuilt);
    }

    Ok(report)
}

/// Keys present on one side only, or whose values differ. Sorted.
fn diff_keys<K, V>(
    published: &HashMap<K, V>,
    rebuilt: &HashMap<K, V>,
    same: impl Fn(&V, &V) -> bool,
) -> Vec<K>
where
    K: Clone + Ord + Eq + Hash,
{
    let keys: BTreeSet<&K> = published.keys().chain(rebuilt.keys()).collect();
    keys.into_iter()
        .filter(|k| match (published.get(*k), rebuilt.get(*k)) {
            (Some(a), Some(b)) => !same(a, b),
            _ => true,
        })
        .cloned()
        .collect()
}
