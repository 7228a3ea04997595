use tracing::warn;

use super::pktline::PktLineReader;
use crate::auth::Actor;
use crate::core::{GitError, ObjectId, Result};
use crate::repository::RepositoryRecord;

/// One `<old> <new> <ref>` command of a push
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub old: ObjectId,
    pub new: ObjectId,
    pub name: String,
}

impl RefUpdate {
    pub fn is_create(&self) -> bool {
        self.old == ObjectId::new([0; 20])
    }

    pub fn is_delete(&self) -> bool {
        self.new == ObjectId::new([0; 20])
    }
}

/// Parse the command list at the start of a receive-pack request body.
///
/// The first command carries the client's capabilities after a NUL byte;
/// `shallow` lines are skipped. Everything after the first flush (the
/// packfile) is left alone.
pub fn parse_ref_updates(body: &[u8]) -> Result<Vec<RefUpdate>> {
    let mut reader = PktLineReader::new(body);
    let mut updates = Vec::new();
    for line in reader.read_until_flush()? {
        let line = line.split(|b| *b == 0).next().unwrap_or_default();
        let line = std::str::from_utf8(line)
            .map_err(|_| GitError::invalid("Push command is not UTF-8"))?
            .trim_end_matches('\n');
        if line.starts_with("shallow ") || line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(3, ' ');
        let (Some(old), Some(new), Some(name)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(GitError::invalid(format!("Malformed push command: {}", line)));
        };
        updates.push(RefUpdate {
            old: ObjectId::from_hex(old)?,
            new: ObjectId::from_hex(new)?,
            name: name.to_string(),
        });
    }
    Ok(updates)
}

/// Hook run on the parsed command list before receive-pack is spawned
pub trait PreReceiveValidator: Send + Sync {
    /// Reject the push by returning an error; nothing is spawned then
    fn validate(&self, actor: &Actor, record: &RepositoryRecord, updates: &[RefUpdate]) -> Result<()>;
}

/// Refuses any update to a listed ref
#[derive(Debug, Clone)]
pub struct ProtectedRefs {
    refs: Vec<String>,
}

impl ProtectedRefs {
    pub fn new(refs: Vec<String>) -> Self {
        Self { refs }
    }
}

impl PreReceiveValidator for ProtectedRefs {
    fn validate(&self, actor: &Actor, record: &RepositoryRecord, updates: &[RefUpdate]) -> Result<()> {
        match updates.iter().find(|update| self.refs.contains(&update.name)) {
            Some(update) => {
                warn!(
                    actor = %actor,
                    repo = %format!("{}/{}", record.owner.username, record.name),
                    reference = %update.name,
                    "rejected push to protected ref"
                );
                Err(GitError::Forbidden(format!("{} is protected", update.name)))
            }
            None => Ok(()),
        }
    }
}

/// Decide whether `actor` may push to `record`.
///
/// Checked in order: credentials present, repository registered, actor owns
/// it. Only an owner gets through.
pub fn authorize_push<'a>(actor: Option<&'a Actor>, record: Option<&RepositoryRecord>) -> Result<&'a Actor> {
    let actor = actor.ok_or_else(|| GitError::Unauthenticated("Authentication required".to_string()))?;
    let record = record.ok_or_else(|| GitError::not_found("Repository not found"))?;
    if record.owner.id != actor.id {
        warn!(
            actor = %actor,
            repo = %format!("{}/{}", record.owner.username, record.name),
            "push by non-owner refused"
        );
        return Err(GitError::Forbidden(
            "You do not have permission to push to this repository".to_string(),
        ));
    }
    Ok(actor)
}
