use crate::{StorageError, StorageResult};

/// Reduce an uploaded filename to a safe, flat name: path components are dropped,
/// whitespace becomes `_` and anything outside `[A-Za-z0-9._-]` is removed.
/// Returns `None` when nothing usable is left.
pub fn sanitize_filename(filename: &str) -> Option<String> {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let sanitized: String = base
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let sanitized = sanitized.trim_start_matches(['.', '_']).to_string();

    if sanitized.is_empty() {
        None
    } else {
        Some(sanitized)
    }
}

/// Filenames handed to the store must already be flat. Anything that could escape
/// the store root is rejected rather than rewritten.
pub(crate) fn validate_filename(filename: &str) -> StorageResult<&str> {
    let invalid = filename.is_empty()
        || filename.contains(['/', '\\'])
        || filename == "."
        || filename == "..";

    if invalid {
        Err(StorageError::InvalidPath(filename.to_string()))
    } else {
        Ok(filename)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("photo 1.jpg").as_deref(), Some("photo_1.jpg"));
        assert_eq!(sanitize_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_filename("C:\\Users\\me\\cat.png").as_deref(), Some("cat.png"));
        assert_eq!(sanitize_filename(".hidden.png").as_deref(), Some("hidden.png"));
        assert_eq!(sanitize_filename("日本.png").as_deref(), Some("png"));
        assert_eq!(sanitize_filename("///"), None);
    }

    #[test]
    fn test_validate_filename() {
        assert!(validate_filename("a.jpg").is_ok());
        assert!(validate_filename("").is_err());
        assert!(validate_filename("..").is_err());
        assert!(validate_filename("dir/a.jpg").is_err());
        assert!(validate_filename("..\\a.jpg").is_err());
    }
}
