use crate::auth::Actor;
use crate::core::{GitError, Result};
use crate::repository::RepositoryRecord;

/// Decide whether `actor` may fetch from `record`.
///
/// With `enforce_visibility` off every repository on disk is fetchable.
/// With it on, private repositories are served to their owner only and look
/// missing to everyone else. A repository without a record is public, as it
/// is for the read API.
pub fn authorize_fetch(actor: Option<&Actor>, record: Option<&RepositoryRecord>, enforce_visibility: bool) -> Result<()> {
    if !enforce_visibility {
        return Ok(());
    }
    match record {
        None => Ok(()),
        Some(record) if record.readable_by(actor.map(|a| a.id.as_str())) => Ok(()),
        Some(_) if actor.is_none() => Err(GitError::Unauthenticated("Authentication required".to_string())),
        Some(_) => Err(GitError::not_found("Repository not found")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{Owner, Visibility};
    use chrono::Utc;
    use std::path::PathBuf;

    fn record(visibility: Visibility) -> RepositoryRecord {
        RepositoryRecord {
            id: "r-1".into(),
            owner: Owner { id: "u-1".into(), username: "alice".into() },
            name: "proj".into(),
            description: String::new(),
            visibility,
            path: PathBuf::from("/srv/git/alice/proj.git"),
            default_branch: "main".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn open_by_default() {
        let private = record(Visibility::Private);
        assert!(authorize_fetch(None, Some(&private), false).is_ok());
        assert!(authorize_fetch(None, None, false).is_ok());
    }

    #[test]
    fn enforced_visibility_hides_private_repositories() {
        let owner = Actor { id: "u-1".into(), username: "alice".into() };
        let other = Actor { id: "u-2".into(), username: "bob".into() };
        let private = record(Visibility::Private);
        let public = record(Visibility::Public);

        assert!(authorize_fetch(None, Some(&public), true).is_ok());
        assert!(authorize_fetch(Some(&owner), Some(&private), true).is_ok());
        assert!(matches!(authorize_fetch(None, Some(&private), true), Err(GitError::Unauthenticated(_))));
        assert!(matches!(authorize_fetch(Some(&other), Some(&private), true), Err(GitError::NotFound(_))));
        // Unregistered repositories are public
        assert!(authorize_fetch(None, None, true).is_ok());
        assert!(authorize_fetch(Some(&other), None, true).is_ok());
    }
}
