use crate::core::{GitError, Result};

/// Convert Windows-style separators to `/`
pub fn to_posix(path: &str) -> String {
    path.replace('\\', "/")
}

/// Split a repository-relative path into its components.
///
/// Empty components (leading, trailing or doubled slashes) are dropped, so
/// `"/a//b/"` yields `["a", "b"]` and `""` yields nothing.
pub fn split_components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

/// Split a path that is about to be written, rejecting components that would
/// escape the tree or that git refuses to store.
pub fn split_writable(path: &str) -> Result<Vec<&str>> {
    let components = split_components(path);
    if components.is_empty() {
        return Err(GitError::invalid("filepath is required"));
    }
    for component in &components {
        if *component == "." || *component == ".." || *component == ".git" || component.contains('\0') {
            return Err(GitError::invalid(format!("Invalid path component in {}", path)));
        }
    }
    Ok(components)
}

/// Validate a single owner or repository name used as a directory name
pub fn validate_segment(kind: &str, value: &str) -> Result<()> {
    let valid = !value.is_empty()
        && !value.starts_with('.')
        && !value.contains(['/', '\\', '\0'])
        && value != "..";
    if valid {
        Ok(())
    } else {
        Err(GitError::invalid(format!("Invalid {} name: {:?}", kind, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_drops_empty_components() {
        assert_eq!(split_components("/a//b/"), vec!["a", "b"]);
        assert!(split_components("").is_empty());
    }

    #[test]
    fn writable_paths_reject_traversal() {
        assert!(split_writable("../etc/passwd").is_err());
        assert!(split_writable("a/.git/config").is_err());
        assert!(split_writable("").is_err());
        assert_eq!(split_writable("src/lib.rs").unwrap(), vec!["src", "lib.rs"]);
    }

    #[test]
    fn segments_are_single_names() {
        assert!(validate_segment("owner", "alice").is_ok());
        assert!(validate_segment("owner", "a/b").is_err());
        assert!(validate_segment("repo", "..").is_err());
        assert!(validate_segment("repo", ".hidden").is_err());
        assert!(validate_segment("repo", "").is_err());
    }

    #[test]
    fn posix_conversion() {
        assert_eq!(to_posix("a\\b\\c.txt"), "a/b/c.txt");
    }
}
