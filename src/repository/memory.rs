use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use super::storage::{CommitInfo, NewCommit, ObjectStore, Signature, TreeEntry};
use crate::core::{EntryMode, GitError, ObjectId, ObjectType, Result};

#[derive(Debug, Clone)]
enum StoredObject {
    Blob(Vec<u8>),
    Tree(Vec<TreeEntry>),
    Commit(CommitInfo),
}

/// In-process object store.
///
/// Objects get the same ids git would give them (canonical encoding hashed
/// with SHA-1), so ids are comparable with an on-disk repository holding the
/// same content. Used for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<ObjectId, StoredObject>>,
    refs: RwLock<BTreeMap<String, ObjectId>>,
}

/// Git's tree ordering: trees sort as if their name ended in `/`
fn tree_sort_key(entry: &TreeEntry) -> Vec<u8> {
    let mut key = entry.name.as_bytes().to_vec();
    if entry.mode.is_tree() {
        key.push(b'/');
    }
    key
}

fn encode_tree(entries: &mut [TreeEntry]) -> Vec<u8> {
    entries.sort_by_key(tree_sort_key);
    let mut data = Vec::new();
    for entry in entries.iter() {
        data.extend_from_slice(entry.mode.as_octal().as_bytes());
        data.push(b' ');
        data.extend_from_slice(entry.name.as_bytes());
        data.push(0);
        data.extend_from_slice(entry.oid.as_bytes());
    }
    data
}

fn encode_signature(role: &str, sig: &Signature) -> String {
    format!(
        "{} {} <{}> {} {}\n",
        role,
        sig.name,
        sig.email,
        sig.time,
        sig.offset_string()
    )
}

fn encode_commit(commit: &CommitInfo) -> Vec<u8> {
    let mut data = format!("tree {}\n", commit.tree);
    for parent in &commit.parents {
        data.push_str(&format!("parent {}\n", parent));
    }
    data.push_str(&encode_signature("author", &commit.author));
    data.push_str(&encode_signature("committer", &commit.committer));
    data.push('\n');
    data.push_str(&commit.message);
    data.into_bytes()
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point a ref at an object unconditionally
    pub fn set_ref(&self, name: &str, target: ObjectId) {
        self.refs.write().insert(name.to_string(), target);
    }

    /// Snapshot of every ref, for before/after comparisons
    pub fn refs(&self) -> BTreeMap<String, ObjectId> {
        self.refs.read().clone()
    }

    /// Number of stored objects
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    /// Write a commit object without touching any ref
    pub fn write_commit(
        &self,
        tree: ObjectId,
        parents: Vec<ObjectId>,
        author: Signature,
        message: &str,
    ) -> Result<ObjectId> {
        self.ensure_kind(&tree, ObjectType::Tree)?;
        for parent in &parents {
            self.ensure_kind(parent, ObjectType::Commit)?;
        }
        let mut commit = CommitInfo {
            oid: ObjectId::new([0; 20]),
            tree,
            parents,
            committer: author.clone(),
            author,
            message: message.to_string(),
        };
        let oid = ObjectId::compute(ObjectType::Commit, &encode_commit(&commit));
        commit.oid = oid;
        self.objects.write().insert(oid, StoredObject::Commit(commit));
        Ok(oid)
    }

    fn ensure_kind(&self, oid: &ObjectId, kind: ObjectType) -> Result<()> {
        let objects = self.objects.read();
        let matches = match (objects.get(oid), kind) {
            (Some(StoredObject::Blob(_)), ObjectType::Blob)
            | (Some(StoredObject::Tree(_)), ObjectType::Tree)
            | (Some(StoredObject::Commit(_)), ObjectType::Commit) => true,
            _ => false,
        };
        if matches {
            Ok(())
        } else {
            Err(GitError::not_found(format!("{} not found: {}", kind.as_str(), oid)))
        }
    }
}

impl ObjectStore for MemoryObjectStore {
    fn resolve_ref(&self, name: &str) -> Result<Option<ObjectId>> {
        Ok(self.refs.read().get(name).copied())
    }

    fn read_commit(&self, oid: &ObjectId) -> Result<CommitInfo> {
        match self.objects.read().get(oid) {
            Some(StoredObject::Commit(commit)) => Ok(commit.clone()),
            _ => Err(GitError::not_found(format!("Commit not found: {}", oid))),
        }
    }

    fn read_tree(&self, oid: &ObjectId) -> Result<Vec<TreeEntry>> {
        match self.objects.read().get(oid) {
            Some(StoredObject::Tree(entries)) => Ok(entries.clone()),
            _ => Err(GitError::not_found(format!("Tree not found: {}", oid))),
        }
    }

    fn read_blob(&self, oid: &ObjectId) -> Result<Vec<u8>> {
        match self.objects.read().get(oid) {
            Some(StoredObject::Blob(data)) => Ok(data.clone()),
            _ => Err(GitError::not_found(format!("Blob not found: {}", oid))),
        }
    }

    fn write_blob(&self, data: &[u8]) -> Result<ObjectId> {
        let oid = ObjectId::compute(ObjectType::Blob, data);
        self.objects
            .write()
            .entry(oid)
            .or_insert_with(|| StoredObject::Blob(data.to_vec()));
        Ok(oid)
    }

    fn write_tree(&self, entries: &[TreeEntry]) -> Result<ObjectId> {
        let mut entries = entries.to_vec();
        for (i, entry) in entries.iter().enumerate() {
            if entries[..i].iter().any(|other| other.name == entry.name) {
                return Err(GitError::invalid(format!("Duplicate tree entry: {}", entry.name)));
            }
            match entry.mode {
                EntryMode::Tree => self.ensure_kind(&entry.oid, ObjectType::Tree)?,
                EntryMode::Commit => {}
                _ => self.ensure_kind(&entry.oid, ObjectType::Blob)?,
            }
        }
        let oid = ObjectId::compute(ObjectType::Tree, &encode_tree(&mut entries));
        self.objects
            .write()
            .entry(oid)
            .or_insert(StoredObject::Tree(entries));
        Ok(oid)
    }

    fn commit(&self, commit: &NewCommit<'_>) -> Result<ObjectId> {
        let oid = self.write_commit(
            commit.tree,
            vec![commit.parent],
            commit.author.clone(),
            commit.message,
        )?;

        let mut refs = self.refs.write();
        match refs.get(commit.reference) {
            Some(current) if *current == commit.parent => {
                refs.insert(commit.reference.to_string(), oid);
                Ok(oid)
            }
            Some(current) => Err(GitError::Conflict(format!(
                "{} moved from {} to {} during the commit",
                commit.reference, commit.parent, current
            ))),
            None => Err(GitError::not_found(format!("Ref not found: {}", commit.reference))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author() -> Signature {
        Signature {
            name: "A U Thor".into(),
            email: "author@example.com".into(),
            time: 1_112_911_993,
            offset_minutes: -420,
        }
    }

    #[test]
    fn tree_ids_match_git() {
        let store = MemoryObjectStore::new();
        // `git mktree` of a single empty file named "a"
        let blob = store.write_blob(b"").unwrap();
        let tree = store
            .write_tree(&[TreeEntry {
                name: "a".into(),
                mode: EntryMode::Blob,
                oid: blob,
            }])
            .unwrap();
        assert_eq!(tree.to_hex(), "496d6428b9cf92981dc9495211e6e1120fb6f2ba");
    }

    #[test]
    fn trees_sort_directories_with_trailing_slash() {
        let store = MemoryObjectStore::new();
        let blob = store.write_blob(b"x").unwrap();
        let sub = store
            .write_tree(&[TreeEntry { name: "f".into(), mode: EntryMode::Blob, oid: blob }])
            .unwrap();
        let tree = store
            .write_tree(&[
                TreeEntry { name: "a.txt".into(), mode: EntryMode::Blob, oid: blob },
                TreeEntry { name: "a".into(), mode: EntryMode::Tree, oid: sub },
            ])
            .unwrap();
        let names: Vec<_> = store.read_tree(&tree).unwrap().into_iter().map(|e| e.name).collect();
        // "a.txt" < "a/" because '.' < '/'
        assert_eq!(names, vec!["a.txt", "a"]);
    }

    #[test]
    fn trees_reject_dangling_entries() {
        let store = MemoryObjectStore::new();
        let err = store
            .write_tree(&[TreeEntry {
                name: "ghost".into(),
                mode: EntryMode::Blob,
                oid: ObjectId::new([1; 20]),
            }])
            .unwrap_err();
        assert!(matches!(err, GitError::NotFound(_)));
    }

    #[test]
    fn commit_requires_matching_parent() {
        let store = MemoryObjectStore::new();
        let tree = store.write_tree(&[]).unwrap();
        let root = store.write_commit(tree, vec![], author(), "root\n").unwrap();
        store.set_ref("refs/heads/main", root);

        let sig = author();
        let first = store
            .commit(&NewCommit {
                reference: "refs/heads/main",
                tree,
                parent: root,
                author: &sig,
                message: "one\n",
            })
            .unwrap();
        let second = store.commit(&NewCommit {
            reference: "refs/heads/main",
            tree,
            parent: root,
            author: &sig,
            message: "two\n",
        });
        assert!(matches!(second, Err(GitError::Conflict(_))));
        assert_eq!(store.resolve_ref("refs/heads/main").unwrap(), Some(first));
    }
}
