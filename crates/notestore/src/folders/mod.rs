//! Folder support.
//!
//! Folders form a tree addressed by absolute pathnames (see [`pathname`]).
//! The tree is closed upwards: a folder record exists for every ancestor of
//! every folder record, and the root `/` can never be removed or renamed.

pub mod pathname;

use crate::error::{Result, StoreError};

pub use pathname::{
    is_descendant_of, is_in_subtree, parent_pathname, pathname_chain, rebase_pathname,
    validate_folder_pathname, PathnameError, ROOT_PATHNAME,
};

/// [`validate_folder_pathname`] mapped into the store's error taxonomy.
pub fn check_folder_pathname(pathname: &str) -> Result<()> {
    validate_folder_pathname(pathname).map_err(|e| {
        StoreError::unprocessable(format!("invalid folder pathname '{}': {}", pathname, e))
    })
}
