use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config format error: {0}")]
    Format(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Format(err.to_string())
    }
}

/// Gitway server configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listener settings
    pub server: HttpConfig,

    /// Where repositories and metadata live on disk
    pub storage: StorageConfig,

    /// Bounds on traversal, history and subprocesses
    pub limits: LimitsConfig,

    /// Access policy toggles
    pub access: AccessConfig,

    /// Pre-receive inspection of pushes
    pub branch_protection: BranchProtectionConfig,

    /// Accounts known to the built-in identity provider
    pub users: Vec<UserConfig>,
}

/// HTTP listener settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
    /// `git` executable used for upload-pack, receive-pack
    pub git_binary: PathBuf,
    /// Value of `Access-Control-Allow-Origin` on API responses
    pub cors_origin: String,
}

/// Storage layout
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root under which `{owner}/{name}.git` bare repositories are kept
    pub root: PathBuf,
    /// JSON file the repository metadata is persisted to; in-memory when unset
    pub metadata_file: Option<PathBuf>,
    /// Parent of the per-edit scratch directories; system temp dir when unset
    pub scratch_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Upper bound on entries returned by the commit history reader
    pub history_limit: usize,
    /// Upper bound on entries materialized by a recursive tree listing
    pub max_tree_entries: usize,
    /// Hard deadline for a proxied git service process
    pub service_timeout_secs: u64,
    /// Deadline for object database reads and edit-and-commit
    pub operation_timeout_secs: u64,
    /// Largest push payload buffered for pre-receive inspection
    pub max_inspect_bytes: usize,
    /// Largest JSON request body accepted by the API
    pub max_json_bytes: usize,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Require the owner for upload-pack on private repositories
    pub enforce_upload_pack_visibility: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchProtectionConfig {
    /// Buffer and inspect receive-pack payloads before applying them
    pub enabled: bool,
    /// Full ref names that pushes may not update
    pub protected_refs: Vec<String>,
}

/// A user account for the built-in identity provider
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserConfig {
    pub id: String,
    pub username: String,
    /// Hex SHA-256 digest of the password, see `gitway hash-password`
    #[serde(default)]
    pub password_sha256: Option<String>,
    /// Bearer token accepted for API calls
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8000,
            git_binary: PathBuf::from("git"),
            cors_origin: "*".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/git"),
            metadata_file: None,
            scratch_dir: None,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            max_tree_entries: 10_000,
            service_timeout_secs: 3600,
            operation_timeout_secs: 30,
            max_inspect_bytes: 64 * 1024 * 1024,
            max_json_bytes: 1024 * 1024,
        }
    }
}

impl Default for BranchProtectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            protected_refs: vec!["refs/heads/main".to_string()],
        }
    }
}

impl LimitsConfig {
    pub fn service_timeout(&self) -> Duration {
        Duration::from_secs(self.service_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

impl ServerConfig {
    /// Load configuration: defaults, then the TOML file (if present), then
    /// `GITWAY_*` environment variables, then the legacy `GIT_STORAGE_PATH`
    /// and `PORT` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix("GITWAY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: ServerConfig = builder.build()?.try_deserialize()?;

        if let Ok(root) = std::env::var("GIT_STORAGE_PATH") {
            config.storage.root = PathBuf::from(root);
        }
        if let Ok(port) = std::env::var("PORT") {
            config.server.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("PORT is not a port number: {}", port)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file only
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)
            .map_err(|e| ConfigError::Format(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration location
    pub fn default_location() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("~/.config"));
        path.push("gitway");
        path.push("config.toml");
        path
    }

    /// Save configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Format(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml)?;
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.history_limit == 0 {
            return Err(ConfigError::Invalid("limits.history_limit must be positive".into()));
        }
        if self.limits.service_timeout_secs == 0 || self.limits.operation_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".into()));
        }
        for user in &self.users {
            if user.id.is_empty() || user.username.is_empty() {
                return Err(ConfigError::Invalid("users need an id and a username".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServerConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.limits.history_limit, 100);
        assert!(!config.branch_protection.enabled);
        assert!(!config.access.enforce_upload_pack_visibility);
        assert_eq!(config.branch_protection.protected_refs, vec!["refs/heads/main"]);
    }

    #[test]
    fn save_then_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = ServerConfig::default();
        config.storage.root = PathBuf::from("/srv/git");
        config.limits.history_limit = 25;
        config.users.push(UserConfig {
            id: "u1".into(),
            username: "alice".into(),
            password_sha256: None,
            token: Some("t0k".into()),
        });
        config.save_to_file(&path).unwrap();

        let loaded = ServerConfig::from_file(&path).unwrap();
        assert_eq!(loaded.storage.root, PathBuf::from("/srv/git"));
        assert_eq!(loaded.limits.history_limit, 25);
        assert_eq!(loaded.users[0].token.as_deref(), Some("t0k"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[limits]\nhistory_limit = 7\n").unwrap();

        let loaded = ServerConfig::from_file(&path).unwrap();
        assert_eq!(loaded.limits.history_limit, 7);
        assert_eq!(loaded.limits.max_tree_entries, 10_000);
        assert_eq!(loaded.server.port, 8000);
    }

    #[test]
    fn rejects_zero_history_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[limits]\nhistory_limit = 0\n").unwrap();
        assert!(matches!(ServerConfig::from_file(&path), Err(ConfigError::Invalid(_))));
    }
}
