//! Composite operations as explicit step lists.
//!
//! Folder rename, folder removal and tag removal touch many documents. None
//! of the backing media offers multi-document transactions, so each of these
//! operations is first computed as a [`Plan`]: an ordered list of
//! single-document writes. Executing a plan applies the steps one by one and
//! stops at the first failure. Steps already applied stay applied:
//!
//! ```text
//! rename /proj -> /project
//!   0 PutFolder  folder:/project
//!   1 PutFolder  folder:/project/notes
//!   2 PutNote    note:…  (folderPathname = /project/notes)
//!   3 DeleteFolder /proj/notes
//!   4 DeleteFolder /proj
//! ```
//!
//! A failure at step 3 leaves both trees on disk, with the note already
//! pointing into the new one. Running the rename again is rejected because
//! the destination exists; the caller finishes the job with `remove_folder`
//! on the old pathname.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::backend::DocBackend;
use crate::error::Result;
use crate::model::{FolderDoc, NoteDoc};

#[derive(Debug, Clone, PartialEq)]
pub enum PlanStep {
    PutFolder(FolderDoc),
    PutNote(NoteDoc),
    DeleteFolder(String),
    DeleteTag(String),
}

impl PlanStep {
    fn describe(&self) -> String {
        match self {
            PlanStep::PutFolder(f) => format!("put {}", f.id),
            PlanStep::PutNote(n) => format!("put {}", n.id),
            PlanStep::DeleteFolder(p) => format!("delete folder {}", p),
            PlanStep::DeleteTag(t) => format!("delete tag {}", t),
        }
    }
}

/// What a single applied step produced.
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    Folder(FolderDoc),
    Note(NoteDoc),
    Deleted,
}

/// Anything a plan can be executed against.
#[async_trait]
pub trait PlanTarget: Send + Sync {
    async fn apply(&self, step: &PlanStep) -> Result<StepResult>;
}

#[async_trait]
impl<T: DocBackend + ?Sized> PlanTarget for T {
    async fn apply(&self, step: &PlanStep) -> Result<StepResult> {
        match step {
            PlanStep::PutFolder(folder) => Ok(StepResult::Folder(
                self.put_folder(folder.clone()).await?,
            )),
            PlanStep::PutNote(note) => Ok(StepResult::Note(self.put_note(note.clone()).await?)),
            PlanStep::DeleteFolder(pathname) => {
                self.delete_folder(pathname).await?;
                Ok(StepResult::Deleted)
            }
            PlanStep::DeleteTag(name) => {
                self.delete_tag(name).await?;
                Ok(StepResult::Deleted)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

/// Canonical records written by an executed plan, in step order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanOutcome {
    pub applied: usize,
    pub folders: Vec<FolderDoc>,
    pub notes: Vec<NoteDoc>,
    pub deleted_folders: Vec<String>,
    pub deleted_tags: Vec<String>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: PlanStep) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Applies every step in order, stopping at the first error.
    ///
    /// There is no rollback: on error the steps before the failing one remain
    /// applied.
    pub async fn execute<T: PlanTarget + ?Sized>(&self, target: &T) -> Result<PlanOutcome> {
        let mut outcome = PlanOutcome::default();

        for (index, step) in self.steps.iter().enumerate() {
            let result = match target.apply(step).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(
                        step = index,
                        total = self.steps.len(),
                        action = %step.describe(),
                        error = %e,
                        "plan aborted; earlier steps remain applied"
                    );
                    return Err(e);
                }
            };

            match (step, result) {
                (_, StepResult::Folder(folder)) => outcome.folders.push(folder),
                (_, StepResult::Note(note)) => outcome.notes.push(note),
                (PlanStep::DeleteFolder(pathname), StepResult::Deleted) => {
                    outcome.deleted_folders.push(pathname.clone())
                }
                (PlanStep::DeleteTag(name), StepResult::Deleted) => {
                    outcome.deleted_tags.push(name.clone())
                }
                (_, StepResult::Deleted) => {}
            }
            outcome.applied += 1;
        }

        debug!(steps = outcome.applied, "plan executed");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::sqlite::SqliteDocDb;
    use crate::store::replicated::ReplicatedBackend;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Lets `allowed` steps through, then fails every step after.
    struct FailAfter<'a> {
        inner: &'a ReplicatedBackend,
        allowed: usize,
        seen: AtomicUsize,
    }

    #[async_trait]
    impl PlanTarget for FailAfter<'_> {
        async fn apply(&self, step: &PlanStep) -> Result<StepResult> {
            if self.seen.fetch_add(1, Ordering::SeqCst) >= self.allowed {
                return Err(StoreError::Io(std::io::Error::other("injected failure")));
            }
            self.inner.apply(step).await
        }
    }

    fn folder_plan() -> Plan {
        let now = Utc::now();
        let mut plan = Plan::new();
        plan.push(PlanStep::PutFolder(FolderDoc::new("/a", now)));
        plan.push(PlanStep::PutFolder(FolderDoc::new("/b", now)));
        plan.push(PlanStep::PutFolder(FolderDoc::new("/c", now)));
        plan
    }

    #[tokio::test]
    async fn test_execute_applies_all_steps() {
        let backend = ReplicatedBackend::new(SqliteDocDb::in_memory().unwrap());
        let outcome = folder_plan().execute(&backend).await.unwrap();

        assert_eq!(outcome.applied, 3);
        assert_eq!(outcome.folders.len(), 3);
        assert!(outcome.folders.iter().all(|f| f.rev.is_some()));
    }

    #[tokio::test]
    async fn test_failure_leaves_earlier_steps_applied() {
        let backend = ReplicatedBackend::new(SqliteDocDb::in_memory().unwrap());
        let failing = FailAfter {
            inner: &backend,
            allowed: 2,
            seen: AtomicUsize::new(0),
        };

        let err = folder_plan().execute(&failing).await.unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));

        assert!(backend.load_folder("/a").await.unwrap().is_some());
        assert!(backend.load_folder("/b").await.unwrap().is_some());
        assert!(backend.load_folder("/c").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_steps_are_reported() {
        let backend = ReplicatedBackend::new(SqliteDocDb::in_memory().unwrap());
        folder_plan().execute(&backend).await.unwrap();

        let mut plan = Plan::new();
        plan.push(PlanStep::DeleteFolder("/a".into()));
        plan.push(PlanStep::DeleteTag("missing".into()));
        let outcome = plan.execute(&backend).await.unwrap();

        assert_eq!(outcome.deleted_folders, vec!["/a"]);
        assert_eq!(outcome.deleted_tags, vec!["missing"]);
        assert!(backend.load_folder("/a").await.unwrap().is_none());
    }
}
