//! Shared vocabulary: errors, object identifiers and configuration.

pub mod config;
mod error;
mod object;

pub use config::{
    AccessConfig, BranchProtectionConfig, ConfigError, HttpConfig, LimitsConfig, ServerConfig,
    StorageConfig, UserConfig,
};
pub use error::{GitError, Result};
pub use object::{EntryMode, ObjectId, ObjectType};
