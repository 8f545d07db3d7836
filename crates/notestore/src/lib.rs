//! # Notestore Architecture
//!
//! Notestore is the **local storage engine** of a note-taking app. It keeps
//! notes, folders, tags and attachments in one or more storages, each backed
//! by either a replicated document database or a plain directory, and hands
//! the UI immutable snapshots of a denormalized index.
//!
//! ## Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  API Layer (api.rs, init.rs)                                │
//! │  - One facade over every storage                            │
//! │  - Opens storages listed in storages.json                   │
//! │  - Notifies the sync scheduler after each mutation          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Command Layer (commands/*.rs)                              │
//! │  - Lock storage, call backend, patch index, publish once    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Index Layer (index.rs, storage.rs)                         │
//! │  - StorageSnapshot: notes + populated folders/tags          │
//! │  - Copy-on-write patches, published through tokio::watch    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Storage Layer (store/)                                     │
//! │  - NoteBackend contract, implemented once by NoteStore<B>   │
//! │  - ReplicatedBackend (revision-tracked docs, replication)   │
//! │  - FsBackend (boostnote.json + notes/*.json + attachments/) │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Alongside: [`sync`] runs one debounced background sync task per linked
//! replicated storage, and [`meta`] persists the list of known storages.
//!
//! ## Key Principle: Index Follows Canonical Data
//!
//! The index is only ever patched after the backend call succeeded, and each
//! mutation publishes exactly one new snapshot. A failed call leaves the
//! published snapshot untouched.
//!
//! ## Logging
//!
//! The crate logs through `tracing` and never installs a subscriber. The
//! embedding application picks one, e.g. `tracing-subscriber` with an
//! `EnvFilter` reading `RUST_LOG=notestore=debug`.
//!
//! ## Module Overview
//!
//! - [`api`]: The facade, entry point for all operations
//! - [`init`]: Bootstrapping from config and `storages.json`
//! - [`commands`]: One module per mutation
//! - [`index`]: Snapshots, patches and consistency checks
//! - [`storage`]: A backend plus its published snapshot
//! - [`store`]: Backend contract and the two backends
//! - [`sync`]: Background sync scheduling
//! - [`meta`]: Local metadata store
//! - [`model`]: Documents and value types
//! - [`folders`], [`tags`], [`ids`]: Pathname, tag name and id rules
//! - [`config`]: Configuration
//! - [`error`]: Error types

pub mod api;
pub mod commands;
pub mod config;
pub mod error;
pub mod folders;
pub mod ids;
pub mod index;
pub mod init;
pub mod meta;
pub mod model;
pub mod storage;
pub mod store;
pub mod sync;
pub mod tags;

pub use api::{NotesApi, StorageLocation};
pub use error::{Result, StoreError, SyncError};
pub use init::{initialize, initialize_with};
