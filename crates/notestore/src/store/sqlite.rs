//! # SQLite Document Engine
//!
//! [`SqliteDocDb`] keeps the [`DocDb`] model in three tables:
//!
//! ```text
//! docs         id PK, rev, history (JSON array), deleted, body (JSON)
//! attachments  (doc_id, name) PK, content_type, data BLOB
//! view_rows    (view_name, view_key, doc_id) PK
//! ```
//!
//! Every write is one transaction over the rows of the document it changes.
//! View definitions are cached next to the connection; writing a design
//! document re-derives them and rebuilds `view_rows`.
//!
//! rusqlite is synchronous, so calls run on the blocking pool behind a single
//! connection mutex. A call that has started runs to completion even if its
//! caller goes away.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::docdb::{
    next_rev, DesignDoc, Doc, DocAttachment, DocDb, ViewDef, DESIGN_PREFIX, MAX_REV_HISTORY,
};
use crate::error::{Result, StoreError};

/// Schema version, stored in `PRAGMA user_version`.
const SCHEMA_VERSION: i32 = 1;

const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS docs (
    id TEXT PRIMARY KEY NOT NULL,
    rev TEXT,
    history TEXT NOT NULL DEFAULT '[]',
    deleted INTEGER NOT NULL DEFAULT 0,
    body TEXT NOT NULL DEFAULT 'null'
);

CREATE TABLE IF NOT EXISTS attachments (
    doc_id TEXT NOT NULL,
    name TEXT NOT NULL,
    content_type TEXT NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (doc_id, name)
);

CREATE TABLE IF NOT EXISTS view_rows (
    view_name TEXT NOT NULL,
    view_key TEXT NOT NULL,
    doc_id TEXT NOT NULL,
    PRIMARY KEY (view_name, view_key, doc_id)
);

CREATE INDEX IF NOT EXISTS idx_view_rows_doc ON view_rows (doc_id);
"#;

const DOC_COLUMNS: &str = "id, rev, history, deleted, body";

struct Inner {
    /// `None` once closed.
    conn: Option<Connection>,
    views: HashMap<String, ViewDef>,
}

/// [`DocDb`] on an SQLite database, in memory or in a file.
#[derive(Clone)]
pub struct SqliteDocDb {
    inner: Arc<Mutex<Inner>>,
    path: Option<PathBuf>,
}

impl SqliteDocDb {
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA temp_store = MEMORY;",
        )?;
        Self::init(conn, Some(path))
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        apply_migrations(&conn)?;
        let views = load_views(&conn)?;
        debug!(path = ?path, views = views.len(), "opened document database");
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                conn: Some(conn),
                views,
            })),
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The main database file and the journal files SQLite keeps beside it.
    pub fn files(path: &Path) -> [PathBuf; 3] {
        let with_suffix = |suffix: &str| {
            let mut name = path.as_os_str().to_owned();
            name.push(suffix);
            PathBuf::from(name)
        };
        [path.to_path_buf(), with_suffix("-wal"), with_suffix("-shm")]
    }

    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &mut HashMap<String, ViewDef>) -> Result<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.lock();
            let Inner { conn, views } = &mut *guard;
            let conn = conn
                .as_mut()
                .ok_or_else(|| StoreError::Store("document database is closed".into()))?;
            f(conn, views)
        })
        .await
        .map_err(|e| StoreError::Store(format!("database task failed: {}", e)))?
    }
}

#[async_trait]
impl DocDb for SqliteDocDb {
    async fn get(&self, id: &str) -> Result<Option<Doc>> {
        let id = id.to_string();
        self.call(move |conn, _| match read_doc(conn, &id)? {
            Some(doc) if !doc.deleted => Ok(Some(with_attachments(conn, doc)?)),
            _ => Ok(None),
        })
        .await
    }

    async fn put(&self, doc: Doc) -> Result<Doc> {
        self.call(move |conn, views| {
            let tx = conn.transaction()?;
            let current = read_doc(&tx, &doc.id)?;
            check_rev(&doc.id, current.as_ref(), doc.rev.as_deref())?;

            let (rev, history) = successor(current.as_ref());
            let mut stored = doc;
            stored.rev = Some(rev);
            stored.history = history;
            stored.deleted = false;

            write_row(&tx, &stored)?;
            if stored.attachments.is_empty() {
                // a tombstone left no attachment rows behind
                stored.attachments = load_attachments(&tx, &stored.id)?;
            } else {
                replace_attachments(&tx, &stored)?;
            }
            let next_views = index_doc(&tx, views, &stored)?;
            tx.commit()?;

            if let Some(next) = next_views {
                *views = next;
            }
            Ok(stored)
        })
        .await
    }

    async fn remove(&self, id: &str, rev: &str) -> Result<String> {
        let (id, rev) = (id.to_string(), rev.to_string());
        self.call(move |conn, views| {
            let tx = conn.transaction()?;
            let current = read_doc(&tx, &id)?
                .filter(|d| !d.deleted)
                .ok_or_else(|| StoreError::not_found(format!("document '{}'", id)))?;
            check_rev(&id, Some(&current), Some(rev.as_str()))?;

            let (next, history) = successor(Some(&current));
            let mut tombstone = Doc::new(id.clone(), Value::Null);
            tombstone.rev = Some(next.clone());
            tombstone.history = history;
            tombstone.deleted = true;

            write_row(&tx, &tombstone)?;
            replace_attachments(&tx, &tombstone)?;
            let next_views = index_doc(&tx, views, &tombstone)?;
            tx.commit()?;

            if let Some(next_views) = next_views {
                *views = next_views;
            }
            Ok(next)
        })
        .await
    }

    async fn all_docs(&self, prefix: &str) -> Result<Vec<Doc>> {
        let prefix = prefix.to_string();
        self.call(move |conn, _| {
            let want_design = prefix.starts_with(DESIGN_PREFIX);
            let rows = {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {} FROM docs
                     WHERE deleted = 0 AND substr(id, 1, length(?1)) = ?1
                     ORDER BY id",
                    DOC_COLUMNS
                ))?;
                let rows = stmt
                    .query_map([&prefix], read_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            };

            let mut docs = Vec::with_capacity(rows.len());
            for row in rows {
                if !want_design && row.0.starts_with(DESIGN_PREFIX) {
                    continue;
                }
                docs.push(with_attachments(conn, into_doc(row)?)?);
            }
            Ok(docs)
        })
        .await
    }

    async fn query(&self, ddoc: &str, view: &str, key: &str) -> Result<Vec<Doc>> {
        let name = format!("{}/{}", ddoc, view);
        let key = key.to_string();
        self.call(move |conn, views| {
            if !views.contains_key(&name) {
                return Err(StoreError::not_found(format!("view '{}'", name)));
            }
            let rows = {
                let mut stmt = conn.prepare_cached(
                    "SELECT d.id, d.rev, d.history, d.deleted, d.body
                     FROM view_rows v JOIN docs d ON d.id = v.doc_id
                     WHERE v.view_name = ?1 AND v.view_key = ?2 AND d.deleted = 0
                     ORDER BY d.id",
                )?;
                let rows = stmt
                    .query_map(params![name, key], read_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            };
            rows.into_iter()
                .map(|row| with_attachments(conn, into_doc(row)?))
                .collect()
        })
        .await
    }

    async fn put_attachment(
        &self,
        id: &str,
        rev: Option<&str>,
        name: &str,
        attachment: DocAttachment,
    ) -> Result<String> {
        let (id, rev, name) = (id.to_string(), rev.map(str::to_string), name.to_string());
        self.call(move |conn, views| {
            let tx = conn.transaction()?;
            let current = read_doc(&tx, &id)?;
            check_rev(&id, current.as_ref(), rev.as_deref())?;

            let (next, history) = successor(current.as_ref());
            let mut doc = current
                .filter(|d| !d.deleted)
                .unwrap_or_else(|| Doc::new(id.clone(), json!({})));
            doc.rev = Some(next.clone());
            doc.history = history;

            write_row(&tx, &doc)?;
            tx.execute(
                "INSERT INTO attachments (doc_id, name, content_type, data)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(doc_id, name) DO UPDATE SET
                     content_type = excluded.content_type,
                     data = excluded.data",
                params![id, name, attachment.content_type, attachment.data],
            )?;
            let next_views = index_doc(&tx, views, &doc)?;
            tx.commit()?;

            if let Some(next_views) = next_views {
                *views = next_views;
            }
            Ok(next)
        })
        .await
    }

    async fn get_attachment(&self, id: &str, name: &str) -> Result<Option<DocAttachment>> {
        let (id, name) = (id.to_string(), name.to_string());
        self.call(move |conn, _| {
            let attachment = conn
                .query_row(
                    "SELECT a.content_type, a.data
                     FROM attachments a JOIN docs d ON d.id = a.doc_id
                     WHERE a.doc_id = ?1 AND a.name = ?2 AND d.deleted = 0",
                    params![id, name],
                    |row| {
                        Ok(DocAttachment {
                            content_type: row.get(0)?,
                            data: row.get(1)?,
                        })
                    },
                )
                .optional()?;
            Ok(attachment)
        })
        .await
    }

    async fn remove_attachment(&self, id: &str, rev: &str, name: &str) -> Result<String> {
        let (id, rev, name) = (id.to_string(), rev.to_string(), name.to_string());
        self.call(move |conn, _| {
            let tx = conn.transaction()?;
            let current = read_doc(&tx, &id)?;
            check_rev(&id, current.as_ref(), Some(rev.as_str()))?;
            let mut doc = current
                .filter(|d| !d.deleted)
                .ok_or_else(|| StoreError::not_found(format!("document '{}'", id)))?;

            let removed = tx.execute(
                "DELETE FROM attachments WHERE doc_id = ?1 AND name = ?2",
                params![id, name],
            )?;
            if removed == 0 {
                return Err(StoreError::not_found(format!("attachment '{}'", name)));
            }

            let (next, history) = successor(Some(&doc));
            doc.rev = Some(next.clone());
            doc.history = history;
            write_row(&tx, &doc)?;
            tx.commit()?;
            Ok(next)
        })
        .await
    }

    async fn changes(&self) -> Result<Vec<Doc>> {
        self.call(|conn, _| {
            let rows = {
                let mut stmt =
                    conn.prepare_cached(&format!("SELECT {} FROM docs ORDER BY id", DOC_COLUMNS))?;
                let rows = stmt
                    .query_map([], read_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            };
            rows.into_iter()
                .map(|row| with_attachments(conn, into_doc(row)?))
                .collect()
        })
        .await
    }

    async fn apply_replicated(&self, docs: Vec<Doc>) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }
        self.call(move |conn, views| {
            let tx = conn.transaction()?;
            let mut design_changed = false;
            for doc in &docs {
                write_row(&tx, doc)?;
                replace_attachments(&tx, doc)?;
                if doc.id.starts_with(DESIGN_PREFIX) {
                    design_changed = true;
                } else {
                    reindex(&tx, views, doc)?;
                }
            }
            let next_views = if design_changed {
                let next = load_views(&tx)?;
                rebuild_view_rows(&tx, &next)?;
                Some(next)
            } else {
                None
            };
            tx.commit()?;

            if let Some(next) = next_views {
                *views = next;
            }
            debug!(docs = docs.len(), "applied replicated documents");
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let conn = inner.lock().conn.take();
            if let Some(conn) = conn {
                conn.close().map_err(|(_, e)| StoreError::from(e))?;
            }
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Store(format!("database task failed: {}", e)))?
    }
}

fn apply_migrations(conn: &Connection) -> Result<()> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < SCHEMA_VERSION {
        info!(from = version, to = SCHEMA_VERSION, "applying document database schema");
        conn.execute_batch(SCHEMA_V1)?;
        conn.execute_batch(&format!("PRAGMA user_version = {};", SCHEMA_VERSION))?;
    }
    Ok(())
}

type DocRow = (String, Option<String>, String, bool, String);

fn read_row(row: &Row<'_>) -> rusqlite::Result<DocRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

/// A document without its attachments.
fn into_doc((id, rev, history, deleted, body): DocRow) -> Result<Doc> {
    Ok(Doc {
        id,
        rev,
        history: serde_json::from_str(&history)?,
        deleted,
        body: serde_json::from_str(&body)?,
        attachments: BTreeMap::new(),
    })
}

/// The stored row at `id`, tombstones included, attachments not loaded.
fn read_doc(conn: &Connection, id: &str) -> Result<Option<Doc>> {
    conn.query_row(
        &format!("SELECT {} FROM docs WHERE id = ?1", DOC_COLUMNS),
        [id],
        read_row,
    )
    .optional()?
    .map(into_doc)
    .transpose()
}

fn with_attachments(conn: &Connection, mut doc: Doc) -> Result<Doc> {
    doc.attachments = load_attachments(conn, &doc.id)?;
    Ok(doc)
}

fn load_attachments(conn: &Connection, id: &str) -> Result<BTreeMap<String, DocAttachment>> {
    let mut stmt = conn.prepare_cached(
        "SELECT name, content_type, data FROM attachments WHERE doc_id = ?1",
    )?;
    let attachments = stmt
        .query_map([id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                DocAttachment {
                    content_type: row.get(1)?,
                    data: row.get(2)?,
                },
            ))
        })?
        .collect::<rusqlite::Result<BTreeMap<String, DocAttachment>>>()?;
    Ok(attachments)
}

fn write_row(conn: &Connection, doc: &Doc) -> Result<()> {
    conn.execute(
        "INSERT INTO docs (id, rev, history, deleted, body) VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
             rev = excluded.rev,
             history = excluded.history,
             deleted = excluded.deleted,
             body = excluded.body",
        params![
            doc.id,
            doc.rev,
            serde_json::to_string(&doc.history)?,
            doc.deleted,
            serde_json::to_string(&doc.body)?,
        ],
    )?;
    Ok(())
}

fn replace_attachments(conn: &Connection, doc: &Doc) -> Result<()> {
    conn.execute("DELETE FROM attachments WHERE doc_id = ?1", [&doc.id])?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO attachments (doc_id, name, content_type, data) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (name, attachment) in &doc.attachments {
        stmt.execute(params![doc.id, name, attachment.content_type, attachment.data])?;
    }
    Ok(())
}

/// Refresh the view rows of `doc`. A design document changes the view
/// definitions themselves: every row is rebuilt and the new definitions are
/// returned for the caller to install once the transaction commits.
fn index_doc(
    conn: &Connection,
    views: &HashMap<String, ViewDef>,
    doc: &Doc,
) -> Result<Option<HashMap<String, ViewDef>>> {
    if doc.id.starts_with(DESIGN_PREFIX) {
        let next = load_views(conn)?;
        rebuild_view_rows(conn, &next)?;
        return Ok(Some(next));
    }
    reindex(conn, views, doc)?;
    Ok(None)
}

fn reindex(conn: &Connection, views: &HashMap<String, ViewDef>, doc: &Doc) -> Result<()> {
    conn.execute("DELETE FROM view_rows WHERE doc_id = ?1", [&doc.id])?;
    insert_view_rows(conn, views, doc)
}

fn insert_view_rows(conn: &Connection, views: &HashMap<String, ViewDef>, doc: &Doc) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO view_rows (view_name, view_key, doc_id) VALUES (?1, ?2, ?3)",
    )?;
    for (name, def) in views {
        for key in def.keys(doc) {
            stmt.execute(params![name, key, doc.id])?;
        }
    }
    Ok(())
}

/// View definitions declared by the live design documents, keyed
/// `<ddoc>/<view>`. Unparsable design documents declare nothing.
fn load_views(conn: &Connection) -> Result<HashMap<String, ViewDef>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, body FROM docs WHERE deleted = 0 AND substr(id, 1, length(?1)) = ?1",
    )?;
    let rows = stmt
        .query_map([DESIGN_PREFIX], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut views = HashMap::new();
    for (id, body) in rows {
        let Some(ddoc) = id.strip_prefix(DESIGN_PREFIX) else {
            continue;
        };
        let Ok(design) = serde_json::from_str::<DesignDoc>(&body) else {
            continue;
        };
        for (name, def) in design.views {
            views.insert(format!("{}/{}", ddoc, name), def);
        }
    }
    Ok(views)
}

fn rebuild_view_rows(conn: &Connection, views: &HashMap<String, ViewDef>) -> Result<()> {
    conn.execute("DELETE FROM view_rows", [])?;
    if views.is_empty() {
        return Ok(());
    }
    let rows = {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM docs WHERE deleted = 0",
            DOC_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };
    for row in rows {
        insert_view_rows(conn, views, &into_doc(row)?)?;
    }
    Ok(())
}

fn check_rev(id: &str, current: Option<&Doc>, rev: Option<&str>) -> Result<()> {
    let ok = match current {
        Some(live) if !live.deleted => rev == live.rev.as_deref(),
        Some(tombstone) => rev.is_none() || rev == tombstone.rev.as_deref(),
        None => rev.is_none(),
    };
    if ok {
        Ok(())
    } else {
        Err(StoreError::Conflict {
            id: id.to_string(),
            expected: rev.map(str::to_string),
            actual: current.and_then(|d| d.rev.clone()),
        })
    }
}

/// Next revision and history for a write over `previous`.
fn successor(previous: Option<&Doc>) -> (String, Vec<String>) {
    match previous {
        Some(previous) => {
            let mut history = Vec::with_capacity(previous.history.len() + 1);
            history.extend(previous.rev.clone());
            history.extend(previous.history.iter().cloned());
            history.truncate(MAX_REV_HISTORY);
            (next_rev(previous.rev.as_deref()), history)
        }
        None => (next_rev(None), Vec::new()),
    }
}
