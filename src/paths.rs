use crate::error::{Error, Result};

/// Normalize a path inside a workspace: strip leading/trailing slashes,
/// drop `.` segments, and collapse repeated slashes.
///
/// An empty or slash-only input returns an empty string (the workspace root).
///
/// # Errors
/// Returns [`Error::PathEscape`] if the path contains a `..` segment or a
/// `.git` segment at any depth, and [`Error::InvalidPath`] if it contains
/// a NUL byte or a backslash, or collapses to nothing (e.g. `"."`).
pub fn normalize_path(path: &str) -> Result<String> {
    if path.is_empty() {
        return Ok(String::new());
    }
    if path.contains('\0') || path.contains('\\') {
        return Err(Error::invalid_path(format!("{:?}", path)));
    }

    let mut segments: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        if seg.is_empty() || seg == "." {
            continue;
        }
        if seg == ".." {
            return Err(Error::path_escape(path));
        }
        segments.push(seg);
    }

    // git treats a `.git` entry at any depth as repository metadata.
    if segments.contains(&".git") {
        return Err(Error::path_escape(path));
    }

    if segments.is_empty() {
        if path.bytes().all(|b| b == b'/') {
            return Ok(String::new());
        }
        return Err(Error::invalid_path("path must not be empty"));
    }

    Ok(segments.join("/"))
}

/// Like [`normalize_path`], but the workspace root itself is rejected.
pub fn normalize_file_path(path: &str) -> Result<String> {
    let norm = normalize_path(path)?;
    if norm.is_empty() {
        return Err(Error::invalid_path("path must name an entry"));
    }
    Ok(norm)
}

/// Validate an owner or repository name used as one directory level under
/// the storage root.
///
/// # Errors
/// [`Error::PathEscape`] for traversal-shaped names (separators, `.`, `..`,
/// or a leading dot); [`Error::InvalidPath`] for empty names or NUL bytes.
pub fn validate_component(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_path("name must not be empty"));
    }
    if name.contains('\0') {
        return Err(Error::invalid_path(format!("{:?}", name)));
    }
    if name.contains('/') || name.contains('\\') || name.starts_with('.') {
        return Err(Error::path_escape(name));
    }
    Ok(())
}

/// Validate a tree entry name (one path segment of a tree description).
pub fn validate_entry_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(Error::invalid_tree(format!("invalid entry name {:?}", name)));
    }
    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(Error::invalid_tree(format!("invalid entry name {:?}", name)));
    }
    Ok(())
}

/// Validate a git branch name.
///
/// Rejects spaces, tabs, control characters, `..`, `@{`, a leading `-` or
/// `/`, a trailing `.` or `/`, and the `.lock` suffix per git's
/// `check-ref-format` rules.
///
/// # Errors
/// Returns [`Error::InvalidRefName`] if the name violates any rule.
pub fn validate_ref_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_ref_name("ref name must not be empty"));
    }

    for ch in name.chars() {
        match ch {
            ':' | ' ' | '\t' | '\n' | '\r' | '\\' | '^' | '~' | '?' | '*' | '[' => {
                return Err(Error::invalid_ref_name(format!(
                    "ref name contains invalid character: {:?}",
                    ch,
                )));
            }
            c if c.is_control() => {
                return Err(Error::invalid_ref_name(format!(
                    "ref name contains control character: {:?}",
                    c,
                )));
            }
            _ => {}
        }
    }

    if name.contains("..") {
        return Err(Error::invalid_ref_name("ref name must not contain '..'"));
    }

    if name.contains("@{") || name == "@" {
        return Err(Error::invalid_ref_name("ref name must not contain '@{'"));
    }

    if name.starts_with('-') || name.starts_with('/') || name.ends_with('/') {
        return Err(Error::invalid_ref_name(format!(
            "ref name must not start with '-' or begin/end with '/': {}",
            name
        )));
    }

    if name.contains("//") || name.split('/').any(|seg| seg.starts_with('.')) {
        return Err(Error::invalid_ref_name(format!(
            "ref name has an empty or hidden component: {}",
            name
        )));
    }

    if name.ends_with('.') {
        return Err(Error::invalid_ref_name("ref name must not end with '.'"));
    }

    if name.ends_with(".lock") {
        return Err(Error::invalid_ref_name("ref name must not end with '.lock'"));
    }

    Ok(())
}

/// Join a parent tree path and an entry name.
pub(crate) fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn normalize_empty() {
        assert_eq!(normalize_path("").unwrap(), "");
        assert_eq!(normalize_path("///").unwrap(), "");
    }

    #[test]
    fn normalize_strips_slashes() {
        assert_eq!(normalize_path("/a/b/c/").unwrap(), "a/b/c");
    }

    #[test]
    fn normalize_collapses_dot_and_doubles() {
        assert_eq!(normalize_path("./a//./b/.").unwrap(), "a/b");
    }

    #[test]
    fn normalize_only_dots_is_error() {
        assert_eq!(normalize_path(".").unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn normalize_rejects_dotdot_as_escape() {
        assert_eq!(normalize_path("a/../b").unwrap_err().kind(), ErrorKind::PathEscape);
        assert_eq!(normalize_path("../etc/passwd").unwrap_err().kind(), ErrorKind::PathEscape);
    }

    #[test]
    fn normalize_rejects_git_dir() {
        assert_eq!(normalize_path(".git/config").unwrap_err().kind(), ErrorKind::PathEscape);
        assert_eq!(normalize_path("./.git").unwrap_err().kind(), ErrorKind::PathEscape);
        assert_eq!(normalize_path("docs/.git").unwrap_err().kind(), ErrorKind::PathEscape);
        assert_eq!(normalize_path("a/b/.git/HEAD").unwrap_err().kind(), ErrorKind::PathEscape);
        assert_eq!(normalize_path("docs/.gitignore").unwrap(), "docs/.gitignore");
    }

    #[test]
    fn file_path_rejects_root() {
        assert!(normalize_file_path("/").is_err());
        assert_eq!(normalize_file_path("/README.txt").unwrap(), "README.txt");
    }

    #[test]
    fn component_rules() {
        assert!(validate_component("user1").is_ok());
        assert!(validate_component("test_repo").is_ok());
        assert_eq!(validate_component("..").unwrap_err().kind(), ErrorKind::PathEscape);
        assert_eq!(validate_component("a/b").unwrap_err().kind(), ErrorKind::PathEscape);
        assert_eq!(validate_component(".hidden").unwrap_err().kind(), ErrorKind::PathEscape);
        assert_eq!(validate_component("").unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn entry_name_rules() {
        assert!(validate_entry_name("README.txt").is_ok());
        assert!(validate_entry_name("..").is_err());
        assert!(validate_entry_name("a/b").is_err());
        assert!(validate_entry_name("").is_err());
    }

    #[test]
    fn validate_ref_ok() {
        assert!(validate_ref_name("main").is_ok());
        assert!(validate_ref_name("feature/login").is_ok());
        assert!(validate_ref_name("new-branch-name").is_ok());
    }

    #[test]
    fn validate_ref_rejects() {
        for bad in [
            "", "my branch", "a:b", "a..b", "a@{0}", "a.", "a.lock", "-x", "/a", "a/", "a//b",
            "a/.b",
        ] {
            assert!(validate_ref_name(bad).is_err(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn join_paths() {
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("a/b", "c"), "a/b/c");
    }
}
