//! # Revision-Tracked Document Database
//!
//! The replicated backend is written against [`DocDb`], a small document
//! database with the semantics of the CouchDB family:
//!
//! - Every document carries a revision token `<generation>-<uuid>`. A write
//!   must present the current token or it fails with
//!   [`StoreError::Conflict`]; a successful write issues the next one.
//! - Deleting leaves a tombstone so the deletion replicates.
//! - Design documents (`_design/<name>`) declare views. A view maps documents
//!   with a given id prefix to the values of one body field; it is kept up to
//!   date on every write so lookups by key never scan.
//! - Binary attachments hang off documents and bump their revision.
//!
//! The engine is [`super::sqlite::SqliteDocDb`]: one row per document, its
//! attachments and view rows in side tables, each write a single transaction
//! over the rows it touches.
//!
//! ## Replication
//!
//! [`replicate`] reconciles a local database with a [`RemoteDocDb`] in both
//! directions, tombstones included. Each document keeps a short history of
//! the revisions it replaced, which tells "ahead" apart from "diverged":
//!
//! | Local vs remote                    | Action                      |
//! |------------------------------------|-----------------------------|
//! | same revision                      | nothing                     |
//! | remote revision in local history   | push local                  |
//! | local revision in remote history   | pull remote                 |
//! | neither                            | conflict, winner both ways  |
//!
//! The winner of a conflict is the revision with the higher generation, then
//! the higher token. Conflicts are written and then reported as
//! [`SyncError::Conflict`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, StoreError, SyncError};

pub const DESIGN_PREFIX: &str = "_design/";

pub(crate) const MAX_REV_HISTORY: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocAttachment {
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Doc {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// Revisions this one replaced, newest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<String>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub body: Value,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attachments: BTreeMap<String, DocAttachment>,
}

impl Doc {
    pub fn new(id: impl Into<String>, body: Value) -> Self {
        Self {
            id: id.into(),
            rev: None,
            history: Vec::new(),
            deleted: false,
            body,
            attachments: BTreeMap::new(),
        }
    }

    /// Split a record that serializes `_id` / `_rev` into a document.
    pub fn from_record<T: Serialize>(record: &T) -> Result<Self> {
        let mut body = serde_json::to_value(record)?;
        let obj = body
            .as_object_mut()
            .ok_or_else(|| StoreError::Store("document body must be a JSON object".into()))?;
        let id = match obj.remove("_id") {
            Some(Value::String(id)) => id,
            _ => return Err(StoreError::Store("document has no string _id".into())),
        };
        let rev = match obj.remove("_rev") {
            Some(Value::String(rev)) => Some(rev),
            _ => None,
        };

        let mut doc = Doc::new(id, body);
        doc.rev = rev;
        Ok(doc)
    }

    /// Inverse of [`Doc::from_record`].
    pub fn to_record<T: DeserializeOwned>(&self) -> Result<T> {
        let mut body = self.body.clone();
        if let Some(obj) = body.as_object_mut() {
            obj.insert("_id".into(), Value::String(self.id.clone()));
            if let Some(rev) = &self.rev {
                obj.insert("_rev".into(), Value::String(rev.clone()));
            }
        }
        Ok(serde_json::from_value(body)?)
    }

    pub fn generation(&self) -> u64 {
        rev_generation(self.rev.as_deref())
    }

    fn approx_size(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}

pub fn rev_generation(rev: Option<&str>) -> u64 {
    rev.and_then(|r| r.split_once('-'))
        .and_then(|(generation, _)| generation.parse().ok())
        .unwrap_or(0)
}

pub(crate) fn next_rev(previous: Option<&str>) -> String {
    format!("{}-{}", rev_generation(previous) + 1, Uuid::new_v4().simple())
}

/// A view over documents whose id starts with `id_prefix`, keyed by the
/// string (or each string of the array) found at `field` in their body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewDef {
    pub id_prefix: String,
    pub field: String,
}

impl ViewDef {
    /// The keys `doc` is listed under. Tombstones have none.
    pub fn keys(&self, doc: &Doc) -> Vec<String> {
        if doc.deleted || !doc.id.starts_with(&self.id_prefix) {
            return Vec::new();
        }
        match doc.body.get(&self.field) {
            Some(Value::String(key)) => vec![key.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignDoc {
    pub views: BTreeMap<String, ViewDef>,
}

impl DesignDoc {
    pub fn to_body(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[async_trait]
pub trait DocDb: Send + Sync {
    /// The live document, `None` when absent or deleted.
    async fn get(&self, id: &str) -> Result<Option<Doc>>;

    /// Write `doc`. Its `rev` must be the stored one, or `None` when the id is
    /// new or deleted. Existing attachments are kept when `doc` carries none.
    async fn put(&self, doc: Doc) -> Result<Doc>;

    /// Replace the live document with a tombstone. Returns the tombstone's rev.
    async fn remove(&self, id: &str, rev: &str) -> Result<String>;

    /// Live documents whose id starts with `prefix`, in id order. Design
    /// documents only show up when `prefix` asks for them.
    async fn all_docs(&self, prefix: &str) -> Result<Vec<Doc>>;

    /// Live documents indexed under `key` by `<ddoc>/<view>`.
    async fn query(&self, ddoc: &str, view: &str, key: &str) -> Result<Vec<Doc>>;

    /// Add or replace an attachment, creating the document when absent.
    /// Returns the document's new rev.
    async fn put_attachment(
        &self,
        id: &str,
        rev: Option<&str>,
        name: &str,
        attachment: DocAttachment,
    ) -> Result<String>;

    async fn get_attachment(&self, id: &str, name: &str) -> Result<Option<DocAttachment>>;

    async fn remove_attachment(&self, id: &str, rev: &str, name: &str) -> Result<String>;

    /// Every document, tombstones included.
    async fn changes(&self) -> Result<Vec<Doc>>;

    /// Store documents exactly as given, revision and history included.
    async fn apply_replicated(&self, docs: Vec<Doc>) -> Result<()>;

    /// Release the underlying storage. Every later call fails.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// The far side of replication.
///
/// Failures carry the remote's HTTP-like status, classified by
/// [`SyncError::from_remote`].
#[async_trait]
pub trait RemoteDocDb: Send + Sync {
    /// Every remote document, tombstones included.
    async fn pull(&self) -> std::result::Result<Vec<Doc>, SyncError>;

    async fn push(&self, docs: Vec<Doc>) -> std::result::Result<(), SyncError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pulled: usize,
    pub pushed: usize,
}

enum Relation {
    Same,
    Ahead,
    Behind,
    Diverged,
}

fn relation(local: &Doc, remote: &Doc) -> Relation {
    if local.rev == remote.rev {
        return Relation::Same;
    }
    let remote_known = remote
        .rev
        .as_ref()
        .map_or(true, |rev| local.history.contains(rev));
    let local_known = local
        .rev
        .as_ref()
        .map_or(true, |rev| remote.history.contains(rev));
    match (remote_known, local_known) {
        (true, _) => Relation::Ahead,
        (false, true) => Relation::Behind,
        (false, false) => Relation::Diverged,
    }
}

/// The deterministic winner of two diverged revisions, carrying the loser's
/// revision in its history so both sides agree afterwards.
fn resolve(a: Doc, b: Doc) -> Doc {
    let a_key = (a.generation(), a.rev.clone());
    let b_key = (b.generation(), b.rev.clone());
    let (mut winner, loser) = if a_key >= b_key { (a, b) } else { (b, a) };

    if let Some(rev) = loser.rev {
        if !winner.history.contains(&rev) {
            winner.history.insert(0, rev);
            winner.history.truncate(MAX_REV_HISTORY);
        }
    }
    winner
}

/// Two-way replication between a local database and a remote.
pub async fn replicate(
    local: &dyn DocDb,
    remote: &dyn RemoteDocDb,
) -> std::result::Result<SyncReport, SyncError> {
    let mut remote_docs: HashMap<String, Doc> = remote
        .pull()
        .await?
        .into_iter()
        .map(|d| (d.id.clone(), d))
        .collect();
    let local_docs = local
        .changes()
        .await
        .map_err(|e| SyncError::Local(e.to_string()))?;

    let mut to_push = Vec::new();
    let mut to_pull = Vec::new();
    let mut conflicts = Vec::new();

    for doc in local_docs {
        let Some(theirs) = remote_docs.remove(&doc.id) else {
            to_push.push(doc);
            continue;
        };
        match relation(&doc, &theirs) {
            Relation::Same => {}
            Relation::Ahead => to_push.push(doc),
            Relation::Behind => to_pull.push(theirs),
            Relation::Diverged => {
                let same_content = doc.deleted == theirs.deleted
                    && doc.body == theirs.body
                    && doc.attachments == theirs.attachments;
                if !same_content {
                    conflicts.push(doc.id.clone());
                }
                let winner = resolve(doc, theirs);
                to_push.push(winner.clone());
                to_pull.push(winner);
            }
        }
    }
    // Whatever is left exists only remotely.
    to_pull.extend(remote_docs.into_values());

    let report = SyncReport {
        pulled: to_pull.len(),
        pushed: to_push.len(),
    };

    if !to_push.is_empty() {
        remote.push(to_push).await?;
    }
    local
        .apply_replicated(to_pull)
        .await
        .map_err(|e| SyncError::Local(e.to_string()))?;

    info!(
        pulled = report.pulled,
        pushed = report.pushed,
        conflicts = conflicts.len(),
        "replication finished"
    );

    if conflicts.is_empty() {
        Ok(report)
    } else {
        conflicts.sort();
        Err(SyncError::Conflict(conflicts))
    }
}

/// A remote living in process memory. Used for local mirrors and tests.
///
/// `set_quota` caps the total stored size; pushes past it fail with status
/// 413. `set_gone(true)` makes every call fail with status 404.
pub struct InMemoryRemote {
    docs: Mutex<BTreeMap<String, Doc>>,
    quota: AtomicU64,
    gone: AtomicBool,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self {
            docs: Mutex::new(BTreeMap::new()),
            quota: AtomicU64::new(u64::MAX),
            gone: AtomicBool::new(false),
        }
    }

    pub fn set_quota(&self, bytes: Option<u64>) {
        self.quota.store(bytes.unwrap_or(u64::MAX), Ordering::SeqCst);
    }

    pub fn set_gone(&self, gone: bool) {
        self.gone.store(gone, Ordering::SeqCst);
    }

    pub async fn doc(&self, id: &str) -> Option<Doc> {
        self.docs.lock().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.docs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.lock().await.is_empty()
    }

    fn check_alive(&self) -> std::result::Result<(), SyncError> {
        if self.gone.load(Ordering::SeqCst) {
            Err(SyncError::from_remote(Some(404), "remote database not found"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteDocDb for InMemoryRemote {
    async fn pull(&self) -> std::result::Result<Vec<Doc>, SyncError> {
        self.check_alive()?;
        Ok(self.docs.lock().await.values().cloned().collect())
    }

    async fn push(&self, docs: Vec<Doc>) -> std::result::Result<(), SyncError> {
        self.check_alive()?;
        let mut stored = self.docs.lock().await;

        let mut merged = stored.clone();
        for doc in docs {
            merged.insert(doc.id.clone(), doc);
        }
        let size: u64 = merged.values().map(|d| d.approx_size() as u64).sum();
        let quota = self.quota.load(Ordering::SeqCst);
        if size > quota {
            return Err(SyncError::from_remote(
                Some(413),
                format!("{} bytes exceeds the {} byte limit", size, quota),
            ));
        }

        *stored = merged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::SqliteDocDb;
    use serde_json::json;

    fn db() -> SqliteDocDb {
        SqliteDocDb::in_memory().unwrap()
    }

    #[tokio::test]
    async fn test_replicate_moves_docs_both_ways() {
        let remote = InMemoryRemote::new();
        let a = db();
        let b = db();

        a.put(Doc::new("note:a", json!({}))).await.unwrap();
        let report = replicate(&a, &remote).await.unwrap();
        assert_eq!(report.pushed, 1);

        replicate(&b, &remote).await.unwrap();
        let doc = b.get("note:a").await.unwrap().unwrap();

        b.remove("note:a", doc.rev.as_deref().unwrap()).await.unwrap();
        replicate(&b, &remote).await.unwrap();
        replicate(&a, &remote).await.unwrap();
        assert!(a.get("note:a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_divergent_edits_conflict_with_deterministic_winner() {
        let remote = InMemoryRemote::new();
        let a = db();
        let b = db();

        a.put(Doc::new("note:a", json!({"v": 0}))).await.unwrap();
        replicate(&a, &remote).await.unwrap();
        replicate(&b, &remote).await.unwrap();

        let mut edit_a = a.get("note:a").await.unwrap().unwrap();
        edit_a.body = json!({"v": "a"});
        a.put(edit_a).await.unwrap();
        let mut edit_b = b.get("note:a").await.unwrap().unwrap();
        edit_b.body = json!({"v": "b"});
        b.put(edit_b).await.unwrap();

        replicate(&a, &remote).await.unwrap();
        let err = replicate(&b, &remote).await.unwrap_err();
        assert_eq!(err, SyncError::Conflict(vec!["note:a".into()]));

        replicate(&a, &remote).await.unwrap();
        let on_a = a.get("note:a").await.unwrap().unwrap();
        let on_b = b.get("note:a").await.unwrap().unwrap();
        assert_eq!(on_a.rev, on_b.rev);
        assert_eq!(on_a.body, on_b.body);

        // Settled: another round is clean.
        replicate(&b, &remote).await.unwrap();
    }

    #[tokio::test]
    async fn test_identical_docs_written_apart_do_not_conflict() {
        let remote = InMemoryRemote::new();
        let a = db();
        let b = db();
        a.put(Doc::new("_design/x", json!({"views": {}}))).await.unwrap();
        b.put(Doc::new("_design/x", json!({"views": {}}))).await.unwrap();

        replicate(&a, &remote).await.unwrap();
        let report = replicate(&b, &remote).await.unwrap();
        assert_eq!(report.pulled, 1);
    }

    #[tokio::test]
    async fn test_remote_failures_are_classified() {
        let remote = InMemoryRemote::new();
        let db = db();
        db.put(Doc::new("note:a", json!({"content": "x".repeat(1000)})))
            .await
            .unwrap();

        remote.set_quota(Some(10));
        let err = replicate(&db, &remote).await.unwrap_err();
        assert!(matches!(err, SyncError::QuotaExceeded(_)));
        assert!(remote.is_empty().await);

        remote.set_quota(None);
        remote.set_gone(true);
        let err = replicate(&db, &remote).await.unwrap_err();
        assert!(matches!(err, SyncError::RemoteGone(_)));
    }
}
