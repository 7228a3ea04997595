//! Read-side traversal of the object graph: ref -> commit -> tree -> blob.
//!
//! Every function here takes the object store by reference and performs only
//! reads, so they are safe to run concurrently against the same repository.

use std::cmp::Ordering;

use serde::Serialize;

use super::refs;
use super::storage::{CommitInfo, ObjectStore, TreeEntry};
use crate::core::{GitError, ObjectId, Result};
use crate::utils::{split_components, to_posix};

/// Kind of a listed entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Dir,
    File,
}

/// API-facing projection of a tree entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeItem {
    pub name: String,
    /// Repository-relative path
    pub path: String,
    #[serde(rename = "type")]
    pub kind: ItemType,
    pub oid: ObjectId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TreeItem>>,
}

impl TreeItem {
    fn from_entry(entry: &TreeEntry, base: &str) -> Self {
        let path = if base.is_empty() {
            entry.name.clone()
        } else {
            format!("{}/{}", base, entry.name)
        };
        Self {
            name: entry.name.clone(),
            path,
            kind: if entry.mode.is_tree() { ItemType::Dir } else { ItemType::File },
            oid: entry.oid,
            children: None,
        }
    }
}

/// Directories first, then byte-wise name order
pub fn compare_items(a: &TreeItem, b: &TreeItem) -> Ordering {
    match (a.kind, b.kind) {
        (ItemType::Dir, ItemType::File) => Ordering::Less,
        (ItemType::File, ItemType::Dir) => Ordering::Greater,
        _ => a.name.as_bytes().cmp(b.name.as_bytes()),
    }
}

/// Which commit a read should look at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Revision {
    /// Branch, tag or full ref name
    Ref(String),
    /// Explicit commit id
    Commit(ObjectId),
}

impl Revision {
    /// An explicit commit wins over a branch; with neither, `default_branch`
    pub fn from_query(branch: Option<&str>, commit: Option<&str>, default_branch: &str) -> Result<Self> {
        match (commit, branch) {
            (Some(commit), _) => Ok(Revision::Commit(ObjectId::from_hex(commit)?)),
            (None, Some(branch)) if !branch.is_empty() => Ok(Revision::Ref(branch.to_string())),
            _ => Ok(Revision::Ref(default_branch.to_string())),
        }
    }
}

/// Resolve a branch, tag or full ref name to a commit id
pub fn resolve_ref(store: &dyn ObjectStore, name: &str) -> Result<ObjectId> {
    for candidate in refs::candidates(name) {
        if let Some(oid) = store.resolve_ref(&candidate)? {
            return Ok(oid);
        }
    }
    Err(GitError::not_found(format!("Branch not found: {}", name)))
}

pub fn read_commit(store: &dyn ObjectStore, oid: &ObjectId) -> Result<CommitInfo> {
    store.read_commit(oid)
}

/// Resolve a revision to the commit it names, checking the commit exists
pub fn resolve_revision(store: &dyn ObjectStore, revision: &Revision) -> Result<CommitInfo> {
    let oid = match revision {
        Revision::Ref(name) => resolve_ref(store, name)?,
        Revision::Commit(oid) => *oid,
    };
    store.read_commit(&oid)
}

/// What a path inside a tree resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub kind: ItemType,
    pub oid: ObjectId,
    /// Normalized repository-relative path, empty for the root
    pub path: String,
}

/// Walk `path` down from `root`, one component at a time.
///
/// Every component but the last must name a tree. Failures report the whole
/// requested path, not just the component that was missing.
pub fn descend(store: &dyn ObjectStore, root: &ObjectId, path: &str) -> Result<Located> {
    let requested = to_posix(path);
    let components = split_components(&requested);

    let mut current = Located {
        kind: ItemType::Dir,
        oid: *root,
        path: String::new(),
    };
    for component in components {
        if current.kind != ItemType::Dir {
            return Err(GitError::not_found(format!("Path not found: {}", requested)));
        }
        let entries = store.read_tree(&current.oid)?;
        let entry = entries
            .iter()
            .find(|entry| entry.name == component)
            .ok_or_else(|| GitError::not_found(format!("Path not found: {}", requested)))?;
        current = Located {
            kind: if entry.mode.is_tree() { ItemType::Dir } else { ItemType::File },
            oid: entry.oid,
            path: if current.path.is_empty() {
                entry.name.clone()
            } else {
                format!("{}/{}", current.path, entry.name)
            },
        };
    }
    Ok(current)
}

/// One level of a tree, directories first
pub fn list_tree(store: &dyn ObjectStore, tree: &ObjectId, base: &str) -> Result<Vec<TreeItem>> {
    let mut items: Vec<TreeItem> = store
        .read_tree(tree)?
        .iter()
        .map(|entry| TreeItem::from_entry(entry, base))
        .collect();
    items.sort_by(compare_items);
    Ok(items)
}

/// Descend to `path` and list it, which must be a directory
pub fn list_path(store: &dyn ObjectStore, root: &ObjectId, path: &str) -> Result<Vec<TreeItem>> {
    let located = descend(store, root, path)?;
    if located.kind != ItemType::Dir {
        return Err(GitError::invalid(format!("Not a directory: {}", path)));
    }
    list_tree(store, &located.oid, &located.path)
}

/// Bounds for a recursive traversal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkLimits {
    /// Deepest level expanded; 1 lists only the starting tree
    pub max_depth: Option<usize>,
    /// Traversal fails once more entries than this would be produced
    pub max_entries: Option<usize>,
}

/// An entry produced by [`TreeWalker`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// 0 for entries of the starting tree
    pub depth: usize,
    pub item: TreeItem,
    /// For directories: whether their entries follow this one
    pub expanded: bool,
}

/// Lazy depth-first traversal of a tree.
///
/// Each subtree is read only when the walker reaches it, and entries come out
/// in listing order (directories first) with every directory immediately
/// followed by its contents.
pub struct TreeWalker<'s> {
    store: &'s dyn ObjectStore,
    limits: WalkLimits,
    /// Remaining items per open level, reversed so `pop` yields the next one
    stack: Vec<Vec<TreeItem>>,
    produced: usize,
    failed: bool,
}

impl<'s> TreeWalker<'s> {
    pub fn new(store: &'s dyn ObjectStore, tree: &ObjectId, base: &str, limits: WalkLimits) -> Result<Self> {
        let mut walker = Self {
            store,
            limits,
            stack: Vec::new(),
            produced: 0,
            failed: false,
        };
        walker.open(tree, base)?;
        Ok(walker)
    }

    fn open(&mut self, tree: &ObjectId, base: &str) -> Result<()> {
        let mut items = list_tree(self.store, tree, base)?;
        items.reverse();
        self.stack.push(items);
        Ok(())
    }

    fn can_expand(&self, depth: usize) -> bool {
        self.limits.max_depth.map_or(true, |max| depth + 1 < max)
    }
}

impl Iterator for TreeWalker<'_> {
    type Item = Result<WalkEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let depth = self.stack.len().checked_sub(1)?;
            let Some(item) = self.stack[depth].pop() else {
                self.stack.pop();
                continue;
            };

            self.produced += 1;
            if let Some(max) = self.limits.max_entries {
                if self.produced > max {
                    self.failed = true;
                    return Some(Err(GitError::invalid(format!(
                        "Tree has more than {} entries; list it level by level instead",
                        max
                    ))));
                }
            }

            let expanded = item.kind == ItemType::Dir && self.can_expand(depth);
            if expanded {
                if let Err(e) = self.open(&item.oid, &item.path) {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
            return Some(Ok(WalkEntry { depth, item, expanded }));
        }
    }
}

/// Eager wrapper over [`TreeWalker`]: nested items with `children` filled in
/// for every expanded directory.
pub fn list_tree_recursive(
    store: &dyn ObjectStore,
    tree: &ObjectId,
    base: &str,
    limits: WalkLimits,
) -> Result<Vec<TreeItem>> {
    fn close(levels: &mut Vec<Vec<TreeItem>>) {
        if let Some(children) = levels.pop() {
            if let Some(parent) = levels.last_mut().and_then(|level| level.last_mut()) {
                parent.children = Some(children);
            }
        }
    }

    let mut levels: Vec<Vec<TreeItem>> = vec![Vec::new()];
    for entry in TreeWalker::new(store, tree, base, limits)? {
        let WalkEntry { depth, item, expanded } = entry?;
        while levels.len() > depth + 1 {
            close(&mut levels);
        }
        levels[depth].push(item);
        if expanded {
            levels.push(Vec::new());
        }
    }
    while levels.len() > 1 {
        close(&mut levels);
    }
    Ok(levels.pop().unwrap_or_default())
}

/// Read the file at `path` in the given commit
pub fn read_file(store: &dyn ObjectStore, commit: &CommitInfo, path: &str) -> Result<Vec<u8>> {
    let located = descend(store, &commit.tree, path)?;
    match located.kind {
        ItemType::File => store.read_blob(&located.oid),
        ItemType::Dir => Err(GitError::invalid(format!("Not a file: {}", path))),
    }
}

/// Content at a path: a directory listing or a file body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PathContent {
    Dir { path: String, oid: ObjectId, items: Vec<TreeItem> },
    File { path: String, oid: ObjectId, content: String },
}

/// Resolve `path` and return whatever lives there
pub fn read_path(store: &dyn ObjectStore, commit: &CommitInfo, path: &str) -> Result<PathContent> {
    let located = descend(store, &commit.tree, path)?;
    match located.kind {
        ItemType::Dir => Ok(PathContent::Dir {
            items: list_tree(store, &located.oid, &located.path)?,
            path: located.path,
            oid: located.oid,
        }),
        ItemType::File => {
            let data = store.read_blob(&located.oid)?;
            Ok(PathContent::File {
                content: String::from_utf8_lossy(&data).into_owned(),
                path: located.path,
                oid: located.oid,
            })
        }
    }
}
