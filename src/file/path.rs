//! Logical-to-physical path mapping.
//!
//! Physical layout is `<root>/<user_id>/<logical path>`. The user's root
//! folder has an empty logical path.

use std::path::PathBuf;

use crate::{CumulusError, Result};

use super::MAX_NAME_LENGTH;

/// Maps a user's logical paths onto the shared storage root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// Create a resolver for the given storage root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Physical directory holding everything a user owns.
    pub fn user_root(&self, user_id: i64) -> PathBuf {
        self.root.join(user_id.to_string())
    }

    /// Physical location of a logical path.
    ///
    /// Segments are not validated here; names must pass [`validate_name`]
    /// before they become part of a logical path.
    pub fn resolve(&self, user_id: i64, logical_path: &str) -> PathBuf {
        let mut path = self.user_root(user_id);
        for segment in logical_path.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path
    }
}

/// Check that a node name is a single, non-traversing path segment.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CumulusError::Validation("name must not be empty".to_string()));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(CumulusError::Validation(format!(
            "name must be at most {MAX_NAME_LENGTH} characters"
        )));
    }
    if name == "." || name == ".." {
        return Err(CumulusError::Validation(format!("invalid name: {name}")));
    }
    if name.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
        return Err(CumulusError::Validation(format!(
            "name contains a separator or control character: {name:?}"
        )));
    }
    Ok(())
}

/// Logical path of a child: `parent/name`, or just `name` at the root.
pub fn join_logical(parent_path: Option<&str>, name: &str) -> String {
    match parent_path {
        Some(parent) if !parent.is_empty() => format!("{parent}/{name}"),
        _ => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_nested() {
        let resolver = PathResolver::new("/srv/files");
        let path = resolver.resolve(42, "docs/reports/q1.pdf");
        assert_eq!(path, PathBuf::from("/srv/files/42/docs/reports/q1.pdf"));
    }

    #[test]
    fn test_resolve_empty_is_user_root() {
        let resolver = PathResolver::new("/srv/files");
        assert_eq!(resolver.resolve(7, ""), resolver.user_root(7));
    }

    #[test]
    fn test_resolve_skips_empty_segments() {
        let resolver = PathResolver::new("/srv/files");
        assert_eq!(
            resolver.resolve(1, "a//b/"),
            PathBuf::from("/srv/files/1/a/b")
        );
    }

    #[test]
    fn test_validate_name_accepts_plain() {
        assert!(validate_name("report.pdf").is_ok());
        assert!(validate_name("my folder").is_ok());
        assert!(validate_name("..hidden").is_ok());
    }

    #[test]
    fn test_validate_name_rejects_traversal() {
        assert!(validate_name("").is_err());
        assert!(validate_name(".").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("../etc").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("a\\b").is_err());
        assert!(validate_name("nul\0").is_err());
    }

    #[test]
    fn test_validate_name_length() {
        let long = "x".repeat(MAX_NAME_LENGTH + 1);
        assert!(validate_name(&long).is_err());
        let ok = "x".repeat(MAX_NAME_LENGTH);
        assert!(validate_name(&ok).is_ok());
    }

    #[test]
    fn test_join_logical() {
        assert_eq!(join_logical(None, "docs"), "docs");
        assert_eq!(join_logical(Some(""), "docs"), "docs");
        assert_eq!(join_logical(Some("docs"), "a.txt"), "docs/a.txt");
    }
}
