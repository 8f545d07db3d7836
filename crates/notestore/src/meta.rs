//! # Local Metadata Store
//!
//! `storages.json` lists the storages this process knows about, so the right
//! backends can be opened at start-up:
//!
//! ```json
//! [
//!   { "id": "a1b2", "name": "Personal", "type": "replicated",
//!     "cloudStorage": { "id": "remote-1", "syncedAt": "2024-05-01T10:00:00Z" } },
//!   { "id": "c3d4", "name": "Blog", "type": "fs", "location": "/home/me/blog" }
//! ]
//! ```
//!
//! Every change rewrites the whole file atomically. A store opened without a
//! path keeps its records in memory only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::model::BackendKind;
use crate::store::fs_backend::write_atomic;

pub const META_FILE: &str = "storages.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageMeta {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: BackendKind,
    /// Directory of a filesystem storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_storage: Option<CloudStorageLink>,
}

/// The remote a replicated storage syncs with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudStorageLink {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct MetaStore {
    path: Option<PathBuf>,
    records: Mutex<Vec<StorageMeta>>,
}

impl MetaStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: Mutex::new(Vec::new()),
        }
    }

    /// Load `storages.json` from `path`. A missing file is an empty list.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: Some(path),
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn list(&self) -> Vec<StorageMeta> {
        self.records.lock().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<StorageMeta> {
        self.records.lock().await.iter().find(|m| m.id == id).cloned()
    }

    pub async fn add(&self, meta: StorageMeta) -> Result<()> {
        self.update(|records| {
            if records.iter().any(|m| m.id == meta.id) {
                return Err(StoreError::unprocessable(format!(
                    "storage '{}' already exists",
                    meta.id
                )));
            }
            records.push(meta);
            Ok(())
        })
        .await
    }

    pub async fn remove(&self, id: &str) -> Result<StorageMeta> {
        let mut removed = None;
        self.update(|records| {
            let pos = position(records, id)?;
            removed = Some(records.remove(pos));
            Ok(())
        })
        .await?;
        removed.ok_or_else(|| StoreError::not_found(format!("storage '{}'", id)))
    }

    pub async fn rename(&self, id: &str, name: &str) -> Result<()> {
        self.update(|records| {
            let pos = position(records, id)?;
            records[pos].name = name.to_string();
            Ok(())
        })
        .await
    }

    pub async fn link_cloud(&self, id: &str, link: CloudStorageLink) -> Result<()> {
        self.update(|records| {
            let pos = position(records, id)?;
            records[pos].cloud_storage = Some(link);
            Ok(())
        })
        .await
    }

    pub async fn unlink_cloud(&self, id: &str) -> Result<()> {
        self.update(|records| {
            let pos = position(records, id)?;
            records[pos].cloud_storage = None;
            Ok(())
        })
        .await
    }

    /// Record a successful sync. Storages without a cloud link are left alone.
    pub async fn stamp_synced(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.update(|records| {
            let pos = position(records, id)?;
            if let Some(link) = records[pos].cloud_storage.as_mut() {
                link.synced_at = Some(at);
            }
            Ok(())
        })
        .await
    }

    /// Apply `edit` to a copy, persist it, then keep it.
    async fn update<F>(&self, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<StorageMeta>) -> Result<()>,
    {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        edit(&mut next)?;
        if let Some(path) = &self.path {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let bytes = serde_json::to_vec_pretty(&next)?;
            write_atomic(dir, path, &bytes).await?;
            debug!(path = %path.display(), storages = next.len(), "Wrote storage list");
        }
        *records = next;
        Ok(())
    }
}

fn position(records: &[StorageMeta], id: &str) -> Result<usize> {
    records
        .iter()
        .position(|m| m.id == id)
        .ok_or_else(|| StoreError::not_found(format!("storage '{}'", id)))
}
