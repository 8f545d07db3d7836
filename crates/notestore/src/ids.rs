//! Document id encoding.
//!
//! Every document lives in one id space and carries its kind in a prefix:
//!
//! | Kind   | Id                  | Example            |
//! |--------|---------------------|--------------------|
//! | Folder | `folder:<pathname>` | `folder:/proj/a`   |
//! | Tag    | `tag:<name>`        | `tag:rust`         |
//! | Note   | `note:<uuid>`       | `note:4f9c…`       |
//!
//! Anything that is neither a folder nor a tag id is treated as a note.

use uuid::Uuid;

pub const FOLDER_ID_PREFIX: &str = "folder:";
pub const TAG_ID_PREFIX: &str = "tag:";
pub const NOTE_ID_PREFIX: &str = "note:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocKind {
    Folder,
    Tag,
    Note,
}

pub fn doc_kind(id: &str) -> DocKind {
    if id.starts_with(FOLDER_ID_PREFIX) {
        DocKind::Folder
    } else if id.starts_with(TAG_ID_PREFIX) {
        DocKind::Tag
    } else {
        DocKind::Note
    }
}

pub fn generate_note_id() -> String {
    format!("{}{}", NOTE_ID_PREFIX, Uuid::new_v4().simple())
}

pub fn folder_id(pathname: &str) -> String {
    format!("{}{}", FOLDER_ID_PREFIX, pathname)
}

pub fn tag_id(name: &str) -> String {
    format!("{}{}", TAG_ID_PREFIX, name)
}

pub fn pathname_from_folder_id(id: &str) -> Option<&str> {
    id.strip_prefix(FOLDER_ID_PREFIX)
}

pub fn tag_name_from_id(id: &str) -> Option<&str> {
    id.strip_prefix(TAG_ID_PREFIX)
}

const MAX_NOTE_STEM_LEN: usize = 128;

/// The part of a note id used for file names (`notes/<this>.json`), or
/// `None` when the id cannot name a file directly inside `notes/`.
pub fn note_file_stem(id: &str) -> Option<&str> {
    id.strip_prefix(NOTE_ID_PREFIX)
        .filter(|stem| is_note_file_stem(stem))
}

/// Generated stems are 32 hex digits. Files written by other tools may use
/// any ASCII letters, digits, `-` and `_`.
pub fn is_note_file_stem(stem: &str) -> bool {
    !stem.is_empty()
        && stem.len() <= MAX_NOTE_STEM_LEN
        && stem
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

pub fn note_id_from_file_stem(stem: &str) -> String {
    format!("{}{}", NOTE_ID_PREFIX, stem)
}
