//! Gitway: a self-hosted Git server speaking Smart HTTP, with a JSON API for
//! browsing trees, reading history and committing single-file edits.

pub mod auth;
pub mod core;
pub mod protocol;
pub mod repository;
pub mod service;
pub mod utils;

// Re-export main components for easier consumption
pub use auth::{Actor, Credentials, IdentityProvider, StaticIdentityProvider};
pub use core::{ConfigError, GitError, ObjectId, Result, ServerConfig};
pub use protocol::{GitBackend, GitService, PreReceiveValidator};
pub use repository::{Locator, MemoryRepositoryStore, RepositoryStore};
pub use service::{AppState, GitHttpServer};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
