use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

/// Full ref name for a user-supplied branch.
///
/// `main` becomes `refs/heads/main`; names that are already qualified
/// (`refs/...`) and `HEAD` pass through unchanged.
pub fn branch_ref(branch: &str) -> String {
    if branch == "HEAD" || branch.starts_with("refs/") {
        branch.to_string()
    } else {
        format!("refs/heads/{}", branch)
    }
}

/// Candidate full names tried, in order, when resolving a short name
pub fn candidates(name: &str) -> Vec<String> {
    if name == "HEAD" || name.starts_with("refs/") {
        vec![name.to_string()]
    } else {
        vec![format!("refs/heads/{}", name), format!("refs/tags/{}", name)]
    }
}

/// Short name of a ref, e.g. `main` for `refs/heads/main`
pub fn short_name(name: &str) -> &str {
    name.strip_prefix("refs/heads/")
        .or_else(|| name.strip_prefix("refs/tags/"))
        .unwrap_or(name)
}

type LockKey = (PathBuf, String);

/// Per-(repository, ref) writer locks.
///
/// Writers take the lock for the ref they are about to advance, so two edits
/// of the same branch run one after the other and the second one builds on the
/// first. Entries nobody holds are pruned on the next lookup.
#[derive(Debug, Default)]
pub struct RefLocks {
    table: Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
}

impl RefLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding `reference` in the repository at `repo`.
    ///
    /// Callers hold the returned handle and lock it:
    /// `let lock = locks.handle(path, name); let _guard = lock.lock();`
    pub fn handle(&self, repo: &Path, reference: &str) -> Arc<Mutex<()>> {
        let mut table = self.table.lock();
        table.retain(|_, lock| Arc::strong_count(lock) > 1);
        table
            .entry((repo.to_path_buf(), reference.to_string()))
            .or_default()
            .clone()
    }

    /// Number of live lock entries
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
