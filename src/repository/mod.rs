pub mod commit;
pub mod history;
pub mod memory;
pub mod metadata;
pub mod navigator;
pub mod refs;
mod storage;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::core::{GitError, Result};
use crate::utils::validate_segment;

pub use commit::{edit_file, edit_file_gated, CommitGate, EditOutcome, EditRequest, ScratchSpace};
pub use history::{history, HistoryEntry};
pub use memory::MemoryObjectStore;
pub use metadata::{MemoryRepositoryStore, NewRepository, Owner, RepositoryRecord, RepositoryStore, Visibility};
pub use navigator::{ItemType, PathContent, Revision, TreeItem, TreeWalker, WalkLimits};
pub use refs::RefLocks;
pub use storage::{CommitInfo, GixObjectStore, NewCommit, ObjectStore, Signature, TreeEntry};

/// Maps `(owner, name)` to the bare repository under the storage root
#[derive(Debug, Clone)]
pub struct Locator {
    root: PathBuf,
}

impl Locator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/{owner}/{name}.git`; does not touch the filesystem
    pub fn locate(&self, owner: &str, name: &str) -> Result<PathBuf> {
        validate_segment("owner", owner)?;
        validate_segment("repository", name)?;
        Ok(self.root.join(owner).join(format!("{}.git", name)))
    }

    pub fn ensure_exists(&self, path: &Path) -> Result<()> {
        if path.is_dir() {
            Ok(())
        } else {
            Err(GitError::not_found("Repository not found"))
        }
    }

    /// Path of an existing repository
    pub fn resolve(&self, owner: &str, name: &str) -> Result<PathBuf> {
        let path = self.locate(owner, name)?;
        self.ensure_exists(&path)?;
        Ok(path)
    }

    /// Open the object store of an existing repository
    pub fn open(&self, owner: &str, name: &str) -> Result<GixObjectStore> {
        GixObjectStore::open(self.resolve(owner, name)?)
    }

    /// Create an empty bare repository whose HEAD points at `default_branch`
    pub fn init_bare(&self, owner: &str, name: &str, default_branch: &str) -> Result<PathBuf> {
        let path = self.locate(owner, name)?;
        if path.exists() {
            return Err(GitError::Conflict(format!("Repository {}/{} already exists", owner, name)));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        GixObjectStore::init_bare(&path)?;
        fs::write(path.join("HEAD"), format!("ref: {}\n", refs::branch_ref(default_branch)))?;
        info!(path = %path.display(), "initialized bare repository");
        Ok(path)
    }
}
