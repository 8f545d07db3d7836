//! # Bootstrapping
//!
//! [`initialize`] turns a [`NotesConfig`] into a ready [`NotesApi`]:
//!
//! 1. Resolve the data directory (config, env, or the platform default via
//!    the `directories` crate) and create it.
//! 2. Load `storages.json`, the list of known storages.
//! 3. Open each storage with the backend its record names. Replicated
//!    storages keep their database at `<data_dir>/storages/<id>.db`;
//!    filesystem storages live wherever their `location` points.
//! 4. For replicated storages with a cloud link, ask the
//!    [`RemoteConnector`] (if any) for the remote and register the storage
//!    with the sync scheduler.
//!
//! A storage that fails to open is skipped with a warning so one broken
//! directory does not take the others down.
//!
//! ## Data Directory Layout
//!
//! ```text
//! <data_dir>/
//! ├── storages.json
//! └── storages/
//!     └── <id>.db            # replicated database (SQLite, WAL)
//! ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::NotesApi;
use crate::config::NotesConfig;
use crate::error::{Result, StoreError};
use crate::meta::{CloudStorageLink, MetaStore, StorageMeta, META_FILE};
use crate::model::BackendKind;
use crate::storage::NoteStorage;
use crate::store::docdb::RemoteDocDb;
use crate::store::{FsBackend, NoteStore, ReplicatedBackend};
use crate::sync::{SyncConfig, SyncTarget};

pub const REPLICA_DIR: &str = "storages";

/// Re-establishes remotes for linked storages at start-up.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(
        &self,
        storage_id: &str,
        link: &CloudStorageLink,
    ) -> Result<Arc<dyn RemoteDocDb>>;
}

pub fn replica_path(data_dir: &Path, storage_id: &str) -> PathBuf {
    data_dir.join(REPLICA_DIR).join(format!("{}.db", storage_id))
}

/// Open the backend a metadata record describes and load its index.
pub(crate) async fn open_storage(data_dir: &Path, meta: &StorageMeta) -> Result<NoteStorage> {
    match meta.kind {
        BackendKind::Replicated => {
            let backend = ReplicatedBackend::open(replica_path(data_dir, &meta.id)).await?;
            let store = Arc::new(NoteStore::with_backend(backend));
            let storage = NoteStorage::load(&meta.id, &meta.name, store.clone()).await?;
            Ok(storage.with_replica(store))
        }
        BackendKind::FileSystem => {
            let location = meta.location.as_deref().ok_or_else(|| {
                StoreError::Config(format!("storage '{}' has no location", meta.id))
            })?;
            let store = Arc::new(NoteStore::with_backend(FsBackend::new(location)));
            NoteStorage::load(&meta.id, &meta.name, store).await
        }
    }
}

pub async fn initialize(config: &NotesConfig) -> Result<NotesApi> {
    initialize_with(config, None).await
}

pub async fn initialize_with(
    config: &NotesConfig,
    connector: Option<Arc<dyn RemoteConnector>>,
) -> Result<NotesApi> {
    let data_dir = config.data_dir()?;
    tokio::fs::create_dir_all(&data_dir).await?;

    let meta = Arc::new(MetaStore::open(data_dir.join(META_FILE)).await?);
    let api = NotesApi::new(&data_dir, meta.clone(), SyncConfig::from(config));

    for record in meta.list().await {
        let storage = match open_storage(&data_dir, &record).await {
            Ok(storage) => Arc::new(storage),
            Err(e) => {
                warn!(storage = %record.id, error = %e, "Skipping storage that failed to open");
                continue;
            }
        };
        api.attach(storage.clone()).await;

        let (Some(link), Some(connector)) = (&record.cloud_storage, &connector) else {
            continue;
        };
        let Some(replica) = storage.replica() else {
            continue;
        };
        match connector.connect(&record.id, link).await {
            Ok(remote) => {
                replica.link(remote).await;
                let target: Arc<dyn SyncTarget> = storage.clone();
                api.scheduler().register(&record.id, target).await;
            }
            Err(e) => {
                warn!(storage = %record.id, error = %e, "Could not reach remote, sync is off");
            }
        }
    }

    info!(
        data_dir = %data_dir.display(),
        storages = api.storage_ids().await.len(),
        "Notes initialized"
    );
    Ok(api)
}
