//! Folder pathname rules.
//!
//! A folder pathname is absolute and slash-delimited; the root is `/`.
//! Every other pathname is `/` followed by one or more non-empty segments
//! joined by `/`. A segment may not contain `<>:"/\|?*` or control
//! characters.

const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

pub const ROOT_PATHNAME: &str = "/";

/// Validates a folder pathname.
///
/// # Examples
/// ```
/// use notestore::folders::pathname::validate_folder_pathname;
///
/// assert!(validate_folder_pathname("/").is_ok());
/// assert!(validate_folder_pathname("/proj/notes").is_ok());
///
/// assert!(validate_folder_pathname("").is_err());
/// assert!(validate_folder_pathname("proj").is_err());
/// assert!(validate_folder_pathname("/proj/").is_err());
/// assert!(validate_folder_pathname("/a//b").is_err());
/// assert!(validate_folder_pathname("/a:b").is_err());
/// ```
pub fn validate_folder_pathname(pathname: &str) -> Result<(), PathnameError> {
    if pathname.is_empty() {
        return Err(PathnameError::Empty);
    }
    if !pathname.starts_with('/') {
        return Err(PathnameError::NotAbsolute);
    }
    if pathname == ROOT_PATHNAME {
        return Ok(());
    }

    for segment in pathname[1..].split('/') {
        if segment.is_empty() {
            return Err(PathnameError::EmptySegment);
        }
        for ch in segment.chars() {
            if ch.is_control() {
                return Err(PathnameError::ControlCharacter);
            }
            if FORBIDDEN_CHARS.contains(&ch) {
                return Err(PathnameError::InvalidCharacter(ch));
            }
        }
    }

    Ok(())
}

/// Parent of a pathname. The root has no parent.
///
/// ```
/// use notestore::folders::pathname::parent_pathname;
///
/// assert_eq!(parent_pathname("/a/b").as_deref(), Some("/a"));
/// assert_eq!(parent_pathname("/a").as_deref(), Some("/"));
/// assert_eq!(parent_pathname("/"), None);
/// ```
pub fn parent_pathname(pathname: &str) -> Option<String> {
    if pathname == ROOT_PATHNAME {
        return None;
    }
    match pathname.rfind('/') {
        Some(0) => Some(ROOT_PATHNAME.to_string()),
        Some(idx) => Some(pathname[..idx].to_string()),
        None => None,
    }
}

/// The pathname itself and all its ancestors, root first.
///
/// `"/a/b"` yields `["/", "/a", "/a/b"]`.
pub fn pathname_chain(pathname: &str) -> Vec<String> {
    let mut chain = vec![pathname.to_string()];
    let mut current = pathname.to_string();
    while let Some(parent) = parent_pathname(&current) {
        chain.push(parent.clone());
        current = parent;
    }
    chain.reverse();
    chain
}

/// True when `candidate` lies strictly below `ancestor`.
pub fn is_descendant_of(candidate: &str, ancestor: &str) -> bool {
    if ancestor == ROOT_PATHNAME {
        return candidate != ROOT_PATHNAME;
    }
    candidate.len() > ancestor.len()
        && candidate.starts_with(ancestor)
        && candidate.as_bytes()[ancestor.len()] == b'/'
}

/// True when `candidate` is `root` or lies below it.
pub fn is_in_subtree(candidate: &str, root: &str) -> bool {
    candidate == root || is_descendant_of(candidate, root)
}

/// Replaces the `old_root` prefix of a subtree member with `new_root`.
///
/// `pathname` must satisfy [`is_in_subtree`] for `old_root`.
pub fn rebase_pathname(pathname: &str, old_root: &str, new_root: &str) -> String {
    if pathname == old_root {
        return new_root.to_string();
    }
    format!("{}{}", new_root, &pathname[old_root.len()..])
}

/// Number of segments; the root has depth 0.
pub fn depth(pathname: &str) -> usize {
    if pathname == ROOT_PATHNAME {
        0
    } else {
        pathname.matches('/').count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathnameError {
    Empty,
    NotAbsolute,
    EmptySegment,
    ControlCharacter,
    InvalidCharacter(char),
}

impl std::fmt::Display for PathnameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathnameError::Empty => write!(f, "folder pathname cannot be empty"),
            PathnameError::NotAbsolute => write!(f, "folder pathname must start with '/'"),
            PathnameError::EmptySegment => {
                write!(f, "folder pathname cannot contain empty segments")
            }
            PathnameError::ControlCharacter => {
                write!(f, "folder pathname cannot contain control characters")
            }
            PathnameError::InvalidCharacter(ch) => write!(
                f,
                "folder name contains invalid character '{}' (<>:\"/\\|?* are not allowed)",
                ch
            ),
        }
    }
}

impl std::error::Error for PathnameError {}
