use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::{debug, info};

use crate::core::{GitError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

/// Owning user of a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: String,
    pub username: String,
}

/// Metadata kept for each hosted repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryRecord {
    pub id: String,
    pub owner: Owner,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub visibility: Visibility,
    /// Location of the bare repository on disk
    pub path: PathBuf,
    pub default_branch: String,
    pub created_at: DateTime<Utc>,
}

impl RepositoryRecord {
    pub fn is_private(&self) -> bool {
        self.visibility == Visibility::Private
    }

    /// Whether the user with `actor_id` may read this repository
    pub fn readable_by(&self, actor_id: Option<&str>) -> bool {
        !self.is_private() || actor_id == Some(self.owner.id.as_str())
    }
}

/// Input for [`RepositoryStore::create`]
#[derive(Debug, Clone)]
pub struct NewRepository {
    pub owner: Owner,
    pub name: String,
    pub description: String,
    pub visibility: Visibility,
    pub path: PathBuf,
}

/// Lookup and registration of repository records.
///
/// Owners are addressed by username, matching the URL layout
/// `/{owner}/{repo}.git`.
#[async_trait]
pub trait RepositoryStore: Send + Sync {
    async fn find_by_owner_and_name(&self, owner: &str, name: &str) -> Result<Option<RepositoryRecord>>;

    /// Fails with [`GitError::Conflict`] if the owner already has a
    /// repository with that name
    async fn create(&self, repo: NewRepository) -> Result<RepositoryRecord>;

    async fn list_public_by_owner(&self, owner: &str) -> Result<Vec<RepositoryRecord>>;

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<RepositoryRecord>>;
}

/// Records held in memory, optionally mirrored to a JSON file
#[derive(Debug, Default)]
pub struct MemoryRepositoryStore {
    records: RwLock<Vec<RepositoryRecord>>,
    file: Option<PathBuf>,
}

fn record_id(owner_id: &str, name: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(owner_id.as_bytes());
    hasher.update(b"/");
    hasher.update(name.as_bytes());
    hex::encode(hasher.finalize())
}

impl MemoryRepositoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load records from `file` if it exists; later changes are written back
    pub fn with_file(file: impl Into<PathBuf>) -> Result<Self> {
        let file = file.into();
        let records = if file.exists() {
            let data = fs::read(&file)?;
            let records: Vec<RepositoryRecord> = serde_json::from_slice(&data).map_err(|e| {
                GitError::Config(format!("Invalid metadata file {}: {}", file.display(), e))
            })?;
            info!(count = records.len(), file = %file.display(), "loaded repository metadata");
            records
        } else {
            Vec::new()
        };
        Ok(Self {
            records: RwLock::new(records),
            file: Some(file),
        })
    }

    /// Insert a record as-is, replacing any with the same owner and name
    pub fn insert(&self, record: RepositoryRecord) -> Result<()> {
        let mut records = self.records.write();
        records.retain(|r| !(r.owner.username == record.owner.username && r.name == record.name));
        records.push(record);
        self.persist(&records)
    }

    fn persist(&self, records: &[RepositoryRecord]) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(records)
            .map_err(|e| GitError::Internal(format!("Failed to encode metadata: {}", e)))?;
        fs::write(file, data)?;
        debug!(file = %file.display(), "persisted repository metadata");
        Ok(())
    }

    fn by_owner(&self, owner: &str, include_private: bool) -> Vec<RepositoryRecord> {
        let mut found: Vec<RepositoryRecord> = self
            .records
            .read()
            .iter()
            .filter(|r| r.owner.username == owner && (include_private || !r.is_private()))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }
}

#[async_trait]
impl RepositoryStore for MemoryRepositoryStore {
    async fn find_by_owner_and_name(&self, owner: &str, name: &str) -> Result<Option<RepositoryRecord>> {
        Ok(self
            .records
            .read()
            .iter()
            .find(|r| r.owner.username == owner && r.name == name)
            .cloned())
    }

    async fn create(&self, repo: NewRepository) -> Result<RepositoryRecord> {
        let mut records = self.records.write();
        if records
            .iter()
            .any(|r| r.owner.username == repo.owner.username && r.name == repo.name)
        {
            return Err(GitError::Conflict(format!(
                "Repository {}/{} already exists",
                repo.owner.username, repo.name
            )));
        }
        let record = RepositoryRecord {
            id: record_id(&repo.owner.id, &repo.name),
            owner: repo.owner,
            name: repo.name,
            description: repo.description,
            visibility: repo.visibility,
            path: repo.path,
            default_branch: "main".to_string(),
            created_at: Utc::now(),
        };
        records.push(record.clone());
        self.persist(&records)?;
        Ok(record)
    }

    async fn list_public_by_owner(&self, owner: &str) -> Result<Vec<RepositoryRecord>> {
        Ok(self.by_owner(owner, false))
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<RepositoryRecord>> {
        Ok(self.by_owner(owner, true))
    }
}
