use std::collections::{BinaryHeap, HashMap};

use chrono::{FixedOffset, TimeZone};
use serde::Serialize;

use super::navigator::resolve_ref;
use super::storage::{CommitInfo, ObjectStore, Signature};
use crate::core::{GitError, ObjectId, Result};

/// Summary of one commit as returned by the history endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub oid: ObjectId,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    /// RFC 3339 in the author's own offset
    pub author_date: String,
    pub parent_oids: Vec<ObjectId>,
}

/// RFC 3339 rendering of a signature's timestamp
pub fn format_date(sig: &Signature) -> Result<String> {
    let offset = FixedOffset::east_opt(sig.offset_minutes * 60)
        .ok_or_else(|| GitError::object_db(format!("Invalid timezone offset: {}", sig.offset_string())))?;
    let date = offset
        .timestamp_opt(sig.time, 0)
        .single()
        .ok_or_else(|| GitError::object_db(format!("Invalid commit time: {}", sig.time)))?;
    Ok(date.to_rfc3339())
}

impl HistoryEntry {
    fn from_commit(commit: &CommitInfo) -> Result<Self> {
        Ok(Self {
            oid: commit.oid,
            message: commit.message.clone(),
            author_name: commit.author.name.clone(),
            author_email: commit.author.email.clone(),
            author_date: format_date(&commit.author)?,
            parent_oids: commit.parents.clone(),
        })
    }
}

/// Heap entry ordered by committer time, newest first; ties broken by id
#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct Pending {
    time: i64,
    oid: ObjectId,
}

/// Walk ancestors of `reference`, newest committer date first, returning at
/// most `limit` commits. Each commit appears once even when reachable through
/// several parents.
pub fn history(store: &dyn ObjectStore, reference: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
    let head = resolve_ref(store, reference)?;
    walk(store, head, limit)
}

/// Like [`history`], starting from an explicit commit
pub fn walk(store: &dyn ObjectStore, start: ObjectId, limit: usize) -> Result<Vec<HistoryEntry>> {
    let mut entries = Vec::new();
    if limit == 0 {
        return Ok(entries);
    }

    // Commits already read, keyed by id; membership doubles as the seen set
    let mut loaded: HashMap<ObjectId, Option<CommitInfo>> = HashMap::new();
    let mut queue = BinaryHeap::new();
    let first = store.read_commit(&start)?;
    queue.push(Pending { time: first.committer.time, oid: start });
    loaded.insert(start, Some(first));

    while let Some(Pending { oid, .. }) = queue.pop() {
        let Some(commit) = loaded.get_mut(&oid).and_then(Option::take) else {
            continue;
        };
        for parent in &commit.parents {
            if !loaded.contains_key(parent) {
                let info = store.read_commit(parent)?;
                queue.push(Pending { time: info.committer.time, oid: *parent });
                loaded.insert(*parent, Some(info));
            }
        }
        entries.push(HistoryEntry::from_commit(&commit)?);
        if entries.len() >= limit {
            break;
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::MemoryObjectStore;

    fn at(time: i64) -> Signature {
        Signature {
            name: "Ann".into(),
            email: "ann@example.com".into(),
            time,
            offset_minutes: 120,
        }
    }

    /// root -> a -> b, plus side branch root -> c merged at m
    fn merge_graph() -> (MemoryObjectStore, Vec<ObjectId>) {
        let store = MemoryObjectStore::new();
        let tree = store.write_tree(&[]).unwrap();
        let root = store.write_commit(tree, vec![], at(100), "root\n").unwrap();
        let a = store.write_commit(tree, vec![root], at(200), "a\n").unwrap();
        let c = store.write_commit(tree, vec![root], at(250), "c\n").unwrap();
        let b = store.write_commit(tree, vec![a], at(300), "b\n").unwrap();
        let m = store.write_commit(tree, vec![b, c], at(400), "merge\n").unwrap();
        store.set_ref("refs/heads/main", m);
        (store, vec![m, b, c, a, root])
    }

    #[test]
    fn newest_first_without_duplicates() {
        let (store, expected) = merge_graph();
        let entries = history(&store, "main", 100).unwrap();
        let oids: Vec<_> = entries.iter().map(|e| e.oid).collect();
        assert_eq!(oids, expected);
        assert_eq!(entries[0].parent_oids.len(), 2);
    }

    #[test]
    fn limit_truncates() {
        let (store, expected) = merge_graph();
        let entries = history(&store, "main", 2).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].oid, expected[1]);
        assert!(history(&store, "main", 0).unwrap().is_empty());
    }

    #[test]
    fn unknown_ref_is_not_found() {
        let (store, _) = merge_graph();
        assert!(matches!(history(&store, "ghost", 10), Err(GitError::NotFound(_))));
    }

    #[test]
    fn dates_keep_the_author_offset() {
        assert_eq!(format_date(&at(0)).unwrap(), "1970-01-01T02:00:00+02:00");
        let entry = HistoryEntry::from_commit(&CommitInfo {
            oid: ObjectId::new([1; 20]),
            tree: ObjectId::new([2; 20]),
            parents: vec![],
            author: at(0),
            committer: at(0),
            message: "m".into(),
        })
        .unwrap();
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["authorName"], "Ann");
        assert_eq!(json["authorDate"], "1970-01-01T02:00:00+02:00");
        assert!(json["parentOids"].as_array().unwrap().is_empty());
    }
}
