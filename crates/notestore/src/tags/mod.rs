//! Tag support.
//!
//! Tags categorize notes. Unlike folders they are flat: a tag record is keyed
//! by its name and has no parent. Tag records are created on demand whenever a
//! note starts referencing a name that has no record yet, and the reconciliation
//! pass at storage load recreates any that went missing.
//!
//! ## Tag Naming Rules
//!
//! See [`validation`] for the full rules. In summary: non-empty, no
//! whitespace, no control characters, none of `#<>:"/\|?*`.

pub mod validation;

use crate::error::{Result, StoreError};

pub use validation::{validate_tag_name, TagValidationError};

/// Validates every name and drops duplicates, keeping first-seen order.
///
/// Duplicates are removed when tags are assigned to a note; documents already
/// on disk are read back as-is.
pub fn normalize_tag_list(tags: &[String]) -> Result<Vec<String>> {
    let mut seen = Vec::with_capacity(tags.len());
    for tag in tags {
        validate_tag_name(tag)
            .map_err(|e| StoreError::unprocessable(format!("invalid tag '{}': {}", tag, e)))?;
        if !seen.contains(tag) {
            seen.push(tag.clone());
        }
    }
    Ok(seen)
}
