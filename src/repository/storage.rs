use std::path::{Path, PathBuf};

use gix::bstr::ByteSlice;
use tracing::debug;

use crate::core::{EntryMode, GitError, ObjectId, Result};

/// Author or committer of a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
    /// Seconds since the unix epoch
    pub time: i64,
    /// Offset from UTC in minutes
    pub offset_minutes: i32,
}

impl Signature {
    /// A signature stamped with the current time and the host's local offset
    pub fn now(name: &str, email: &str) -> Self {
        let now = chrono::Local::now();
        Self {
            name: name.to_string(),
            email: email.to_string(),
            time: now.timestamp(),
            offset_minutes: now.offset().local_minus_utc() / 60,
        }
    }

    /// `+hhmm` / `-hhmm` as written into commit headers
    pub fn offset_string(&self) -> String {
        let sign = if self.offset_minutes < 0 { '-' } else { '+' };
        let minutes = self.offset_minutes.abs();
        format!("{}{:02}{:02}", sign, minutes / 60, minutes % 60)
    }
}

/// A decoded commit object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub oid: ObjectId,
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

/// One entry of a tree object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub mode: EntryMode,
    pub oid: ObjectId,
}

/// A commit to be written and published on a ref
#[derive(Debug)]
pub struct NewCommit<'a> {
    /// Full ref name to advance, e.g. `refs/heads/main`
    pub reference: &'a str,
    pub tree: ObjectId,
    /// Expected current value of `reference`; the update fails if it moved
    pub parent: ObjectId,
    /// Used as both author and committer
    pub author: &'a Signature,
    pub message: &'a str,
}

/// Narrow view of a git object database.
///
/// Reads fail with [`GitError::NotFound`] for missing objects; a ref that does
/// not exist resolves to `Ok(None)`. [`ObjectStore::commit`] is a
/// compare-and-swap on the ref: if the ref no longer points at
/// `NewCommit::parent` it fails with [`GitError::Conflict`] and the ref is left
/// untouched.
pub trait ObjectStore: Send {
    fn resolve_ref(&self, name: &str) -> Result<Option<ObjectId>>;

    fn read_commit(&self, oid: &ObjectId) -> Result<CommitInfo>;

    fn read_tree(&self, oid: &ObjectId) -> Result<Vec<TreeEntry>>;

    fn read_blob(&self, oid: &ObjectId) -> Result<Vec<u8>>;

    fn write_blob(&self, data: &[u8]) -> Result<ObjectId>;

    /// Write a tree; entries may come in any order
    fn write_tree(&self, entries: &[TreeEntry]) -> Result<ObjectId>;

    fn commit(&self, commit: &NewCommit<'_>) -> Result<ObjectId>;
}

/// Object store backed by an on-disk repository opened with gitoxide
pub struct GixObjectStore {
    repo: gix::Repository,
    path: PathBuf,
}

impl GixObjectStore {
    /// Open an existing (bare) repository
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let repo = gix::open(path).map_err(|e| {
            GitError::object_db(format!("Failed to open repository {}: {}", path.display(), e))
        })?;
        Ok(Self {
            repo,
            path: path.to_path_buf(),
        })
    }

    /// Create an empty bare repository
    pub fn init_bare(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let repo = gix::init_bare(path).map_err(|e| {
            GitError::object_db(format!("Failed to initialize {}: {}", path.display(), e))
        })?;
        Ok(Self {
            repo,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn find(&self, oid: &ObjectId, expected: gix::object::Kind) -> Result<gix::Object<'_>> {
        let object = self
            .repo
            .try_find_object(gix::ObjectId::from(*oid))
            .map_err(GitError::object_db)?
            .ok_or_else(|| GitError::not_found(format!("Object not found: {}", oid)))?;
        if object.kind != expected {
            return Err(GitError::not_found(format!(
                "Object {} is a {}, not a {}",
                oid, object.kind, expected
            )));
        }
        Ok(object)
    }
}

fn signature_from(sig: &gix::actor::SignatureRef<'_>) -> Signature {
    Signature {
        name: sig.name.to_str_lossy().into_owned(),
        email: sig.email.to_str_lossy().into_owned(),
        time: i64::from(sig.time.seconds),
        offset_minutes: sig.time.offset / 60,
    }
}

fn mode_from(mode: gix::objs::tree::EntryMode) -> EntryMode {
    use gix::objs::tree::EntryMode as Gix;
    match mode {
        Gix::Tree => EntryMode::Tree,
        Gix::Blob => EntryMode::Blob,
        Gix::BlobExecutable => EntryMode::BlobExecutable,
        Gix::Link => EntryMode::Link,
        Gix::Commit => EntryMode::Commit,
    }
}

fn mode_into(mode: EntryMode) -> gix::objs::tree::EntryMode {
    use gix::objs::tree::EntryMode as Gix;
    match mode {
        EntryMode::Tree => Gix::Tree,
        EntryMode::Blob => Gix::Blob,
        EntryMode::BlobExecutable => Gix::BlobExecutable,
        EntryMode::Link => Gix::Link,
        EntryMode::Commit => Gix::Commit,
    }
}

impl ObjectStore for GixObjectStore {
    fn resolve_ref(&self, name: &str) -> Result<Option<ObjectId>> {
        // Names that are not valid ref names cannot exist
        if let Err(e) = <&gix::refs::PartialNameRef>::try_from(name) {
            debug!(name, error = %e, "invalid ref name");
            return Ok(None);
        }
        let mut reference = match self
            .repo
            .try_find_reference(name)
            .map_err(|e| GitError::object_db(format!("Failed to look up {}: {}", name, e)))?
        {
            Some(reference) => reference,
            None => return Ok(None),
        };
        match reference.peel_to_id_in_place() {
            Ok(id) => Ok(Some(ObjectId::from(id.detach().as_ref()))),
            // Symbolic refs pointing at an unborn branch
            Err(e) => {
                debug!(name, error = %e, "ref does not peel to an object");
                Ok(None)
            }
        }
    }

    fn read_commit(&self, oid: &ObjectId) -> Result<CommitInfo> {
        let object = self.find(oid, gix::object::Kind::Commit)?;
        let commit = gix::objs::CommitRef::from_bytes(&object.data).map_err(GitError::object_db)?;
        Ok(CommitInfo {
            oid: *oid,
            tree: ObjectId::from(commit.tree().as_ref()),
            parents: commit.parents().map(|p| ObjectId::from(p.as_ref())).collect(),
            author: signature_from(&commit.author),
            committer: signature_from(&commit.committer),
            message: commit.message.to_str_lossy().into_owned(),
        })
    }

    fn read_tree(&self, oid: &ObjectId) -> Result<Vec<TreeEntry>> {
        let object = self.find(oid, gix::object::Kind::Tree)?;
        let tree = gix::objs::TreeRef::from_bytes(&object.data).map_err(GitError::object_db)?;
        Ok(tree
            .entries
            .iter()
            .map(|entry| TreeEntry {
                name: entry.filename.to_str_lossy().into_owned(),
                mode: mode_from(entry.mode),
                oid: ObjectId::from(entry.oid),
            })
            .collect())
    }

    fn read_blob(&self, oid: &ObjectId) -> Result<Vec<u8>> {
        let object = self.find(oid, gix::object::Kind::Blob)?;
        Ok(object.detach().data)
    }

    fn write_blob(&self, data: &[u8]) -> Result<ObjectId> {
        let id = self.repo.write_blob(data).map_err(GitError::object_db)?;
        Ok(ObjectId::from(id.detach().as_ref()))
    }

    fn write_tree(&self, entries: &[TreeEntry]) -> Result<ObjectId> {
        let mut tree = gix::objs::Tree::empty();
        tree.entries = entries
            .iter()
            .map(|entry| gix::objs::tree::Entry {
                mode: mode_into(entry.mode),
                filename: entry.name.as_str().into(),
                oid: entry.oid.into(),
            })
            .collect();
        tree.entries.sort();
        let id = self.repo.write_object(&tree).map_err(GitError::object_db)?;
        Ok(ObjectId::from(id.detach().as_ref()))
    }

    fn commit(&self, commit: &NewCommit<'_>) -> Result<ObjectId> {
        let offset_seconds = commit.author.offset_minutes * 60;
        let time = gix::date::Time::new(
            commit
                .author
                .time
                .try_into()
                .map_err(|_| GitError::invalid("Commit time out of range"))?,
            offset_seconds,
        );
        let signature = gix::actor::Signature {
            name: commit.author.name.as_str().into(),
            email: commit.author.email.as_str().into(),
            time,
        };

        // commit_as refuses to move the ref unless it still points at the parent
        match self.repo.commit_as(
            signature.to_ref(),
            signature.to_ref(),
            commit.reference,
            commit.message,
            gix::ObjectId::from(commit.tree),
            [gix::ObjectId::from(commit.parent)],
        ) {
            Ok(id) => Ok(ObjectId::from(id.detach().as_ref())),
            Err(e) => match self.resolve_ref(commit.reference)? {
                Some(current) if current != commit.parent => Err(GitError::Conflict(format!(
                    "{} moved from {} to {} during the commit",
                    commit.reference, commit.parent, current
                ))),
                _ => Err(GitError::object_db(format!(
                    "Failed to commit to {}: {}",
                    commit.reference, e
                ))),
            },
        }
    }
}
