//! Identity port: turns an `Authorization` header into an [`Actor`].

use std::fmt;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::core::UserConfig;

/// An authenticated user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub username: String,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.username, self.id)
    }
}

/// Credentials presented with a request
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Basic { username: String, password: String },
    Bearer(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Basic { username, .. } => write!(f, "Basic({}, <redacted>)", username),
            Credentials::Bearer(_) => f.write_str("Bearer(<redacted>)"),
        }
    }
}

impl Credentials {
    /// Parse an `Authorization` header value. Unknown schemes and malformed
    /// values yield `None`.
    pub fn from_header(value: &str) -> Option<Self> {
        let (scheme, rest) = value.trim().split_once(' ')?;
        let rest = rest.trim();
        if scheme.eq_ignore_ascii_case("basic") {
            let decoded = STANDARD.decode(rest).ok()?;
            let decoded = String::from_utf8(decoded).ok()?;
            let (username, password) = decoded.split_once(':')?;
            Some(Credentials::Basic {
                username: username.to_string(),
                password: password.to_string(),
            })
        } else if scheme.eq_ignore_ascii_case("bearer") && !rest.is_empty() {
            Some(Credentials::Bearer(rest.to_string()))
        } else {
            None
        }
    }
}

/// Verifies credentials against some user directory
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The actor the credentials belong to, or `None` if they do not verify
    async fn authenticate(&self, credentials: &Credentials) -> Option<Actor>;
}

/// Hex SHA-256 digest as stored in `users[].password_sha256`
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Users listed in the server configuration
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    users: Vec<UserConfig>,
}

impl StaticIdentityProvider {
    pub fn new(users: Vec<UserConfig>) -> Self {
        Self { users }
    }

    fn actor(user: &UserConfig) -> Actor {
        Actor {
            id: user.id.clone(),
            username: user.username.clone(),
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn authenticate(&self, credentials: &Credentials) -> Option<Actor> {
        match credentials {
            Credentials::Basic { username, password } => {
                let digest = hash_password(password);
                self.users
                    .iter()
                    .find(|user| {
                        &user.username == username
                            && user
                                .password_sha256
                                .as_deref()
                                .map_or(false, |stored| stored.eq_ignore_ascii_case(&digest))
                    })
                    .map(Self::actor)
            }
            Credentials::Bearer(token) => self
                .users
                .iter()
                .find(|user| user.token.as_deref() == Some(token.as_str()))
                .map(Self::actor),
        }
    }
}
