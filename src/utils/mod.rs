pub mod path;

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::{GitError, Result};

pub use path::{split_components, split_writable, to_posix, validate_segment};

/// Get the absolute path from a potentially relative path
pub fn absolute_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        std::env::current_dir()
            .map(|dir| dir.join(path))
            .map_err(|e| GitError::Internal(format!("Failed to get current directory: {}", e)))
    }
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir_exists(dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    } else if !dir.is_dir() {
        return Err(GitError::Internal(format!(
            "Path exists but is not a directory: {}",
            dir.display()
        )));
    }
    Ok(())
}
