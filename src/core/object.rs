use std::fmt;
use std::str::FromStr;

use hex::{FromHex, ToHex};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};

use crate::core::{GitError, Result};

/// Represents a Git object ID (SHA-1 hash)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 20]);

impl ObjectId {
    /// Create a new ObjectId from bytes
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Create an ObjectId from a 20-byte slice
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let id: [u8; 20] = bytes.try_into().map_err(|_| {
            GitError::invalid(format!("Invalid object ID length: {}", bytes.len()))
        })?;
        Ok(Self(id))
    }

    /// Parse a 40-character hex object ID
    pub fn from_hex(hex: &str) -> Result<Self> {
        hex.parse()
            .map_err(|_| GitError::invalid(format!("Invalid object ID: {}", hex)))
    }

    /// Compute the object ID for the given content
    pub fn compute(object_type: ObjectType, content: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(object_type.as_str().as_bytes());
        hasher.update(b" ");
        hasher.update(content.len().to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(content);

        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hasher.finalize());
        Self(bytes)
    }

    /// Get the object ID as bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Get a hex string representation
    pub fn to_hex(&self) -> String {
        self.0.encode_hex::<String>()
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = <[u8; 20]>::from_hex(s)?;
        Ok(Self(bytes))
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        hex.parse().map_err(serde::de::Error::custom)
    }
}

impl From<ObjectId> for gix::ObjectId {
    fn from(id: ObjectId) -> Self {
        gix::ObjectId::from(id.0)
    }
}

impl From<&gix::oid> for ObjectId {
    fn from(id: &gix::oid) -> Self {
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(id.as_bytes());
        Self(bytes)
    }
}

/// Enumeration of Git object types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectType {
    /// Convert the object type to its string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Commit => "commit",
            ObjectType::Tree => "tree",
            ObjectType::Blob => "blob",
            ObjectType::Tag => "tag",
        }
    }
}

/// Mode of a tree entry, as stored in tree objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryMode {
    Tree,
    Blob,
    BlobExecutable,
    Link,
    /// Submodule gitlink
    Commit,
}

impl EntryMode {
    pub fn is_tree(&self) -> bool {
        matches!(self, EntryMode::Tree)
    }

    /// Regular or executable file
    pub fn is_blob(&self) -> bool {
        matches!(self, EntryMode::Blob | EntryMode::BlobExecutable)
    }

    /// Octal mode as written into tree objects (no leading zero for trees)
    pub fn as_octal(&self) -> &'static str {
        match self {
            EntryMode::Tree => "40000",
            EntryMode::Blob => "100644",
            EntryMode::BlobExecutable => "100755",
            EntryMode::Link => "120000",
            EntryMode::Commit => "160000",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_blob_hash_matches_git() {
        let id = ObjectId::compute(ObjectType::Blob, b"");
        assert_eq!(id.to_hex(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
    }

    #[test]
    fn hex_parsing_rejects_short_ids() {
        assert!(ObjectId::from_hex("abc").is_err());
        let id = ObjectId::from_hex("e69de29bb2d1d6434b8b29ae775ad8c2e48c5391").unwrap();
        assert_eq!(id.to_string(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
    }

    #[test]
    fn serializes_as_hex_string() {
        let id = ObjectId::compute(ObjectType::Blob, b"");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"e69de29bb2d1d6434b8b29ae775ad8c2e48c5391\"");
        let back: ObjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
