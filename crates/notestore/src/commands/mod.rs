//! # Command Layer
//!
//! Every mutation of a storage goes through a command. Each command lives in
//! its own submodule and exposes `run`-style async functions over a
//! [`NoteStorage`].
//!
//! ## Shape of a Command
//!
//! ```text
//! lock storage ──► backend call ──► fetch records new to the index
//!                      │                     │
//!                   error? ── return         error? ── rebuild ──► publish
//!                                            │
//!                              one SnapshotPatch ──► publish
//! ```
//!
//! 1. Take the storage's write lock and hold it to the end.
//! 2. Call the backend. If it fails, return the error. Nothing has been
//!    patched, so the published snapshot is unchanged.
//! 3. Load the folder and tag records that now exist canonically but are
//!    missing from the index (a note moved to a new folder brings its
//!    freshly created ancestors along).
//! 4. Apply everything to a single [`crate::index::SnapshotPatch`] and
//!    publish once. Readers see either the old snapshot or the new one.
//!
//! When step 3 fails the write has already happened, so the command still
//! succeeds: the index is rebuilt from canonical data, or, if even that
//! fails, the written record is published on its own.
//!
//! Commands return the canonical records the backend produced.
//!
//! ## Composite Failures
//!
//! Folder rename, folder removal and tag removal run as backend plans of
//! single-document writes. When one fails part way, the backend keeps the
//! writes before it and the command returns the error without patching, so
//! the index lags behind canonical data. [`doctor`] rebuilds it.
//!
//! ## Command Modules
//!
//! - [`create`]: Create notes
//! - [`update`]: Edit notes (title, content, tags, folder, data)
//! - [`trash`]: Soft-delete notes
//! - [`untrash`]: Restore notes from the trash
//! - [`purge`]: Hard-delete notes
//! - [`folders`]: Create, rename and remove folders
//! - [`tags`]: Remove tags
//! - [`move_note`]: Move a note to another storage
//! - [`attachments`]: Add and remove attachments
//! - [`bookmark`]: Bookmark/unbookmark notes
//! - [`archive`]: Archive/unarchive notes
//! - [`doctor`]: Verify and repair the index
//! - [`helpers`]: Shared patch-building utilities
//!
//! [`NoteStorage`]: crate::storage::NoteStorage

pub mod archive;
pub mod attachments;
pub mod bookmark;
pub mod create;
pub mod doctor;
pub mod folders;
pub mod helpers;
pub mod move_note;
pub mod purge;
pub mod tags;
pub mod trash;
pub mod untrash;
pub mod update;
