use hyper::StatusCode;
use thiserror::Error;

/// Result type used throughout the application
pub type Result<T> = std::result::Result<T, GitError>;

/// Error taxonomy shared by the transport proxy, the navigator and the API.
///
/// Every variant maps onto exactly one HTTP status through
/// [`GitError::status_code`]; the variants that wrap a lower-level failure keep
/// its message so the cause survives up to the log line.
#[derive(Error, Debug)]
pub enum GitError {
    /// Malformed or missing parameters
    #[error("{0}")]
    InvalidArgument(String),

    /// No credentials, or credentials that did not verify
    #[error("{0}")]
    Unauthenticated(String),

    /// Authenticated, but not allowed to touch this repository
    #[error("{0}")]
    Forbidden(String),

    /// Missing repository, ref, commit, path or file
    #[error("{0}")]
    NotFound(String),

    /// A ref moved underneath a writer, or a record already exists
    #[error("{0}")]
    Conflict(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failures reported by the object database
    #[error("Object database error: {0}")]
    ObjectDatabase(String),

    /// A git service process failed to start or exited badly
    #[error("Git process error: {0}")]
    Process(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Anything else
    #[error("{0}")]
    Internal(String),
}

impl GitError {
    /// HTTP status this error is reported with
    pub fn status_code(&self) -> StatusCode {
        match self {
            GitError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            GitError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            GitError::Forbidden(_) => StatusCode::FORBIDDEN,
            GitError::NotFound(_) => StatusCode::NOT_FOUND,
            GitError::Conflict(_) => StatusCode::CONFLICT,
            GitError::Io(_)
            | GitError::ObjectDatabase(_)
            | GitError::Process(_)
            | GitError::Config(_)
            | GitError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this is a server-side fault rather than a caller mistake
    pub fn is_internal(&self) -> bool {
        self.status_code().is_server_error()
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        GitError::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        GitError::NotFound(msg.into())
    }

    pub fn object_db(msg: impl std::fmt::Display) -> Self {
        GitError::ObjectDatabase(msg.to_string())
    }
}

impl From<crate::core::config::ConfigError> for GitError {
    fn from(err: crate::core::config::ConfigError) -> Self {
        GitError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for GitError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            GitError::InvalidArgument(format!("Invalid JSON body: {}", err))
        } else {
            GitError::Internal(format!("JSON error: {}", err))
        }
    }
}

impl From<hyper::Error> for GitError {
    fn from(err: hyper::Error) -> Self {
        GitError::Io(std::io::Error::new(std::io::ErrorKind::Other, err))
    }
}
