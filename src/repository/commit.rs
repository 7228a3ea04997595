use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, info};

use super::refs::{branch_ref, RefLocks};
use super::storage::{NewCommit, ObjectStore, Signature, TreeEntry};
use crate::core::{EntryMode, GitError, ObjectId, Result};
use crate::utils::{split_writable, to_posix};

pub const DEFAULT_AUTHOR_NAME: &str = "Web Editor";
pub const DEFAULT_AUTHOR_EMAIL: &str = "web@example.com";

fn default_branch() -> String {
    "main".to_string()
}

/// A single-file edit submitted through the API
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRequest {
    #[serde(default = "default_branch")]
    pub branch: String,
    pub filepath: String,
    pub content: String,
    pub message: String,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub author_email: Option<String>,
}

/// Result of a successful edit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditOutcome {
    pub oid: ObjectId,
    pub branch: String,
    pub path: String,
}

/// Where per-edit scratch directories are created
#[derive(Debug, Clone, Default)]
pub struct ScratchSpace {
    root: Option<PathBuf>,
}

impl ScratchSpace {
    /// Scratch directories under `root`, or the system temp dir when `None`
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    /// A fresh directory, removed when the returned handle is dropped
    pub fn acquire(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("repo-edit-");
        let dir = match &self.root {
            Some(root) => {
                fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Committing,
    Cancelled,
}

/// Shared between an edit and whoever waits for it.
///
/// The waiter may cancel the edit up to the moment it starts updating the
/// ref. After that the edit always runs to completion.
#[derive(Debug, Clone)]
pub struct CommitGate {
    phase: Arc<Mutex<Phase>>,
}

impl Default for CommitGate {
    fn default() -> Self {
        Self { phase: Arc::new(Mutex::new(Phase::Running)) }
    }
}

impl CommitGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the edit from committing. Returns `false` when it is too late
    /// and the caller has to wait for the outcome instead.
    pub fn cancel(&self) -> bool {
        let mut phase = self.phase.lock();
        match *phase {
            Phase::Committing => false,
            Phase::Running | Phase::Cancelled => {
                *phase = Phase::Cancelled;
                true
            }
        }
    }

    /// Claim the right to update the ref; fails once cancelled
    pub fn begin_commit(&self) -> Result<()> {
        let mut phase = self.phase.lock();
        match *phase {
            Phase::Cancelled => Err(GitError::Internal("Edit cancelled before commit".to_string())),
            Phase::Running | Phase::Committing => {
                *phase = Phase::Committing;
                Ok(())
            }
        }
    }
}

/// Write `request.content` to `request.filepath` on `request.branch` and
/// commit it on top of the branch head.
///
/// Edits of the same ref in the same repository are serialized through
/// `locks`, and the final ref update only succeeds if the branch still points
/// at the head this edit started from.
pub fn edit_file(
    store: &dyn ObjectStore,
    locks: &RefLocks,
    repo: &Path,
    scratch: &ScratchSpace,
    request: &EditRequest,
) -> Result<EditOutcome> {
    edit_file_gated(store, locks, repo, scratch, request, &CommitGate::new())
}

/// [`edit_file`] that leaves the ref alone if `gate` is cancelled before the
/// commit starts.
pub fn edit_file_gated(
    store: &dyn ObjectStore,
    locks: &RefLocks,
    repo: &Path,
    scratch: &ScratchSpace,
    request: &EditRequest,
    gate: &CommitGate,
) -> Result<EditOutcome> {
    let filepath = to_posix(&request.filepath);
    let components = split_writable(&filepath)?;
    if request.message.trim().is_empty() {
        return Err(GitError::invalid("message is required"));
    }

    // Removed on drop, whichever way this function returns
    let workdir = scratch.acquire()?;

    let reference = branch_ref(&request.branch);
    let lock = locks.handle(repo, &reference);
    let _guard = lock.lock();

    let head = store
        .resolve_ref(&reference)?
        .ok_or_else(|| GitError::not_found(format!("Branch not found: {}", request.branch)))?;
    let head_commit = store.read_commit(&head)?;

    let target = components
        .iter()
        .fold(workdir.path().to_path_buf(), |path, component| path.join(component));
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&target, request.content.as_bytes())?;

    let blob = store.write_blob(&fs::read(&target)?)?;
    let tree = splice(store, Some(head_commit.tree), &components, blob, &filepath)?;
    debug!(%blob, %tree, path = %filepath, "staged edit");

    let author = Signature::now(
        request.author_name.as_deref().unwrap_or(DEFAULT_AUTHOR_NAME),
        request.author_email.as_deref().unwrap_or(DEFAULT_AUTHOR_EMAIL),
    );
    gate.begin_commit()?;
    let oid = store.commit(&NewCommit {
        reference: &reference,
        tree,
        parent: head,
        author: &author,
        message: &request.message,
    })?;
    info!(%oid, reference = %reference, path = %filepath, "committed edit");

    Ok(EditOutcome {
        oid,
        branch: request.branch.clone(),
        path: components.join("/"),
    })
}

/// Replace or insert the blob at `components` below `tree`, writing a new
/// tree for every directory on the way.
fn splice(
    store: &dyn ObjectStore,
    tree: Option<ObjectId>,
    components: &[&str],
    blob: ObjectId,
    full_path: &str,
) -> Result<ObjectId> {
    let Some((name, rest)) = components.split_first() else {
        return Err(GitError::invalid("filepath is required"));
    };
    let mut entries = match tree {
        Some(tree) => store.read_tree(&tree)?,
        None => Vec::new(),
    };
    let existing = entries.iter().position(|entry| entry.name == *name);

    let entry = if rest.is_empty() {
        let mode = match existing.map(|i| entries[i].mode) {
            Some(EntryMode::Tree) => {
                return Err(GitError::invalid(format!("{} is a directory", full_path)));
            }
            Some(EntryMode::BlobExecutable) => EntryMode::BlobExecutable,
            _ => EntryMode::Blob,
        };
        TreeEntry { name: name.to_string(), mode, oid: blob }
    } else {
        let subtree = match existing.map(|i| &entries[i]) {
            Some(entry) if entry.mode.is_tree() => Some(entry.oid),
            Some(_) => {
                return Err(GitError::invalid(format!(
                    "Cannot write {}: {} is not a directory",
                    full_path, name
                )));
            }
            None => None,
        };
        TreeEntry {
            name: name.to_string(),
            mode: EntryMode::Tree,
            oid: splice(store, subtree, rest, blob, full_path)?,
        }
    };

    match existing {
        Some(i) => entries[i] = entry,
        None => entries.push(entry),
    }
    store.write_tree(&entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::history::history;
    use crate::repository::memory::MemoryObjectStore;
    use crate::repository::navigator::{read_file, resolve_ref};

    fn seeded() -> (MemoryObjectStore, ObjectId) {
        let store = MemoryObjectStore::new();
        let readme = store.write_blob(b"# Project\n").unwrap();
        let tree = store
            .write_tree(&[TreeEntry { name: "README.md".into(), mode: EntryMode::Blob, oid: readme }])
            .unwrap();
        let root = store
            .write_commit(tree, vec![], Signature::now("Seed", "seed@example.com"), "init\n")
            .unwrap();
        store.set_ref("refs/heads/main", root);
        (store, root)
    }

    fn request(path: &str, content: &str) -> EditRequest {
        EditRequest {
            branch: "main".into(),
            filepath: path.into(),
            content: content.into(),
            message: format!("edit {}", path),
            author_name: None,
            author_email: None,
        }
    }

    fn scratch_root() -> (TempDir, ScratchSpace) {
        let dir = tempfile::tempdir().unwrap();
        let space = ScratchSpace::new(Some(dir.path().join("scratch")));
        (dir, space)
    }

    fn is_empty_dir(path: &Path) -> bool {
        fs::read_dir(path).map(|mut entries| entries.next().is_none()).unwrap_or(true)
    }

    #[test]
    fn edit_round_trips_through_history_and_reads() {
        let (store, root) = seeded();
        let (_tmp, scratch) = scratch_root();
        let locks = RefLocks::new();

        let outcome = edit_file(
            &store,
            &locks,
            Path::new("/repos/a/b.git"),
            &scratch,
            &request("docs/guide/intro.md", "hello"),
        )
        .unwrap();
        assert_eq!(outcome.path, "docs/guide/intro.md");
        assert_eq!(outcome.branch, "main");

        assert_eq!(resolve_ref(&store, "main").unwrap(), outcome.oid);
        let commit = store.read_commit(&outcome.oid).unwrap();
        assert_eq!(commit.parents, vec![root]);
        assert_eq!(commit.author.name, DEFAULT_AUTHOR_NAME);
        assert_eq!(commit.committer.email, DEFAULT_AUTHOR_EMAIL);
        assert_eq!(read_file(&store, &commit, "docs/guide/intro.md").unwrap(), b"hello");
        // Untouched siblings survive the tree rewrite
        assert_eq!(read_file(&store, &commit, "README.md").unwrap(), b"# Project\n");

        let log = history(&store, "main", 10).unwrap();
        assert_eq!(log[0].oid, outcome.oid);
        assert_eq!(log[0].message, "edit docs/guide/intro.md");
    }

    #[test]
    fn custom_author_is_used_for_both_roles() {
        let (store, _) = seeded();
        let (_tmp, scratch) = scratch_root();
        let mut req = request("README.md", "changed");
        req.author_name = Some("Ada".into());
        req.author_email = Some("ada@example.com".into());

        let outcome = edit_file(&store, &RefLocks::new(), Path::new("r"), &scratch, &req).unwrap();
        let commit = store.read_commit(&outcome.oid).unwrap();
        assert_eq!(commit.author.name, "Ada");
        assert_eq!(commit.committer.name, "Ada");
        assert_eq!(read_file(&store, &commit, "README.md").unwrap(), b"changed");
    }

    #[test]
    fn missing_branch_changes_nothing() {
        let (store, _) = seeded();
        let (_tmp, scratch) = scratch_root();
        let before = store.refs();
        let objects = store.object_count();

        let mut req = request("new.txt", "x");
        req.branch = "nonexistent".into();
        let err = edit_file(&store, &RefLocks::new(), Path::new("r"), &scratch, &req).unwrap_err();

        assert!(matches!(err, GitError::NotFound(_)));
        assert_eq!(store.refs(), before);
        assert_eq!(store.object_count(), objects);
        assert!(is_empty_dir(&scratch.root.clone().unwrap()));
    }

    #[test]
    fn scratch_is_removed_after_success() {
        let (store, _) = seeded();
        let (_tmp, scratch) = scratch_root();
        edit_file(&store, &RefLocks::new(), Path::new("r"), &scratch, &request("a/b.txt", "b")).unwrap();
        assert!(is_empty_dir(&scratch.root.clone().unwrap()));
    }

    #[test]
    fn rejects_bad_requests() {
        let (store, _) = seeded();
        let (_tmp, scratch) = scratch_root();
        let locks = RefLocks::new();
        let before = store.refs();

        let mut no_message = request("a.txt", "x");
        no_message.message = "  ".into();
        for req in [request("", "x"), request("../escape", "x"), no_message] {
            let err = edit_file(&store, &locks, Path::new("r"), &scratch, &req).unwrap_err();
            assert!(matches!(err, GitError::InvalidArgument(_)), "{:?}", err);
        }

        // README.md is a file, so it cannot be a directory on the path
        let err = edit_file(&store, &locks, Path::new("r"), &scratch, &request("README.md/inner", "x"))
            .unwrap_err();
        assert!(matches!(err, GitError::InvalidArgument(_)));
        assert_eq!(store.refs(), before);
    }

    #[test]
    fn cancelled_edit_leaves_the_branch_alone() {
        let (store, _) = seeded();
        let (_tmp, scratch) = scratch_root();
        let before = store.refs();

        let gate = CommitGate::new();
        assert!(gate.cancel());
        let req = request("late.txt", "x");
        let err = edit_file_gated(&store, &RefLocks::new(), Path::new("r"), &scratch, &req, &gate).unwrap_err();

        assert!(matches!(err, GitError::Internal(_)));
        assert_eq!(store.refs(), before);
        assert!(is_empty_dir(&scratch.root.clone().unwrap()));
    }

    #[test]
    fn a_commit_in_progress_cannot_be_cancelled() {
        let gate = CommitGate::new();
        gate.begin_commit().unwrap();
        assert!(!gate.cancel());
        assert!(gate.begin_commit().is_ok());
    }

    #[test]
    fn concurrent_edits_of_one_branch_both_land() {
        let (store, _) = seeded();
        let (_tmp, scratch) = scratch_root();
        let locks = RefLocks::new();
        let repo = Path::new("/repos/o/r.git");

        let outcomes: Vec<EditOutcome> = std::thread::scope(|s| {
            let handles: Vec<_> = ["one.txt", "two.txt"]
                .into_iter()
                .map(|path| {
                    let (store, locks, scratch) = (&store, &locks, &scratch);
                    s.spawn(move || edit_file(store, locks, repo, scratch, &request(path, path)).unwrap())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let log = history(&store, "main", 10).unwrap();
        assert_eq!(log.len(), 3);
        for outcome in &outcomes {
            assert!(log.iter().any(|entry| entry.oid == outcome.oid));
        }
        let head = store.read_commit(&resolve_ref(&store, "main").unwrap()).unwrap();
        assert_eq!(read_file(&store, &head, "one.txt").unwrap(), b"one.txt");
        assert_eq!(read_file(&store, &head, "two.txt").unwrap(), b"two.txt");
    }
}
