//! # Configuration
//!
//! Configuration is loaded with [`confique`] in layers, highest priority
//! first:
//! 1. **Environment variables**: `NOTESTORE_SYNC_DEBOUNCE_SECS`,
//!    `NOTESTORE_SYNC_INTERVAL_SECS`, `NOTESTORE_DATA_DIR`.
//! 2. **Config file**: `notestore.toml` in the platform config directory
//!    (via the `directories` crate), or a path given explicitly.
//! 3. **Compiled defaults**: `#[config(default = ...)]`.
//!
//! ## Available Settings
//!
//! | Key | Default | Description |
//! |-----|---------|-------------|
//! | `sync_debounce_secs` | `30` | Sync this long after the last local change |
//! | `sync_interval_secs` | `600` | Sync this often when nothing changes |
//! | `data_dir` | platform data dir | Where `storages.json` and replicated databases live |

use confique::Config;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};

pub const CONFIG_FILE: &str = "notestore.toml";

#[derive(Config, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NotesConfig {
    /// Seconds to wait after the last local change before syncing.
    #[config(default = 30, env = "NOTESTORE_SYNC_DEBOUNCE_SECS")]
    pub sync_debounce_secs: u64,

    /// Seconds between syncs of an idle storage.
    #[config(default = 600, env = "NOTESTORE_SYNC_INTERVAL_SECS")]
    pub sync_interval_secs: u64,

    /// Root for the metadata store and replicated databases. When absent,
    /// the platform data directory is used.
    #[config(env = "NOTESTORE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
}

impl Default for NotesConfig {
    fn default() -> Self {
        Self {
            sync_debounce_secs: 30,
            sync_interval_secs: 600,
            data_dir: None,
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "notestore")
}

impl NotesConfig {
    /// Load from the environment and the default config file.
    pub fn load() -> Result<Self> {
        let file = project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE));
        Self::load_layers(file.as_deref())
    }

    /// Load from the environment and `file` (which may not exist).
    pub fn load_from(file: &Path) -> Result<Self> {
        Self::load_layers(Some(file))
    }

    fn load_layers(file: Option<&Path>) -> Result<Self> {
        let mut builder = NotesConfig::builder().env();
        if let Some(file) = file {
            builder = builder.file(file);
        }
        builder
            .load()
            .map_err(|e| StoreError::Config(e.to_string()))
    }

    /// The data directory, falling back to the platform default.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        project_dirs()
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| StoreError::Config("no home directory to put data in".to_string()))
    }
}
