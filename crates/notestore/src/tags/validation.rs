//! Tag name validation.
//!
//! Tags are flat names with no path semantics. A valid tag name:
//! - Is not empty
//! - Contains no whitespace
//! - Contains none of `#<>:"/\|?*`
//! - Contains no control characters

const FORBIDDEN_CHARS: &[char] = &['#', '<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Validates a tag name.
///
/// # Examples
/// ```
/// use notestore::tags::validation::validate_tag_name;
///
/// assert!(validate_tag_name("rust").is_ok());
/// assert!(validate_tag_name("work-in_progress").is_ok());
/// assert!(validate_tag_name("日本語").is_ok());
///
/// assert!(validate_tag_name("").is_err());
/// assert!(validate_tag_name("two words").is_err());
/// assert!(validate_tag_name("#hash").is_err());
/// assert!(validate_tag_name("a/b").is_err());
/// ```
pub fn validate_tag_name(name: &str) -> Result<(), TagValidationError> {
    if name.is_empty() {
        return Err(TagValidationError::Empty);
    }

    for ch in name.chars() {
        if ch.is_whitespace() {
            return Err(TagValidationError::Whitespace);
        }
        if ch.is_control() {
            return Err(TagValidationError::ControlCharacter);
        }
        if FORBIDDEN_CHARS.contains(&ch) {
            return Err(TagValidationError::InvalidCharacter(ch));
        }
    }

    Ok(())
}

/// Error type for tag name validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagValidationError {
    /// Tag name is empty
    Empty,
    /// Tag name contains whitespace
    Whitespace,
    /// Tag name contains a control character
    ControlCharacter,
    /// Tag name contains a reserved character
    InvalidCharacter(char),
}

impl std::fmt::Display for TagValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TagValidationError::Empty => write!(f, "tag name cannot be empty"),
            TagValidationError::Whitespace => write!(f, "tag name cannot contain whitespace"),
            TagValidationError::ControlCharacter => {
                write!(f, "tag name cannot contain control characters")
            }
            TagValidationError::InvalidCharacter(ch) => {
                write!(
                    f,
                    "tag name contains invalid character '{}' (#<>:\"/\\|?* are not allowed)",
                    ch
                )
            }
        }
    }
}

impl std::error::Error for TagValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_tags() {
        assert!(validate_tag_name("foo").is_ok());
        assert!(validate_tag_name("Foo").is_ok());
        assert!(validate_tag_name("7up").is_ok());
        assert!(validate_tag_name("-leading-hyphen").is_ok());
        assert!(validate_tag_name("a.b").is_ok());
        assert!(validate_tag_name("émoji🚀").is_ok());
    }

    #[test]
    fn test_empty_tag_rejected() {
        assert_eq!(validate_tag_name(""), Err(TagValidationError::Empty));
    }

    #[test]
    fn test_whitespace_rejected() {
        assert_eq!(validate_tag_name("a b"), Err(TagValidationError::Whitespace));
        assert_eq!(validate_tag_name("a\tb"), Err(TagValidationError::Whitespace));
        assert_eq!(validate_tag_name(" a"), Err(TagValidationError::Whitespace));
    }

    #[test]
    fn test_control_characters_rejected() {
        assert_eq!(
            validate_tag_name("a\u{0007}b"),
            Err(TagValidationError::ControlCharacter)
        );
    }

    #[test]
    fn test_each_reserved_character_rejected() {
        for ch in FORBIDDEN_CHARS {
            let name = format!("tag{}", ch);
            assert_eq!(
                validate_tag_name(&name),
                Err(TagValidationError::InvalidCharacter(*ch)),
                "expected '{}' to be rejected",
                name
            );
        }
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            TagValidationError::Empty.to_string(),
            "tag name cannot be empty"
        );
        assert!(TagValidationError::InvalidCharacter('#')
            .to_string()
            .contains("'#'"));
    }
}
