//! Core object model for hotchpotch
//!
//! Implements content-addressable revisions and part blobs. A revision's id is
//! derived from its parents, type code, creator code and part contents, so a
//! revision can never list itself (directly or transitively) as an ancestor.
//! Documents are named by a stable random identifier instead.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Content hash of a stored blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId([u8; 32]);

impl ObjectId {
    /// Create a new ObjectId from raw bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Compute ObjectId from data
    pub fn from_data(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(hash.into())
    }

    /// Convert to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hexadecimal string
    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex_str)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Identifier of a revision, derived from the revision's identity fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RevId(ObjectId);

impl RevId {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(ObjectId::new(bytes))
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        ObjectId::from_hex(hex_str).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl std::fmt::Display for RevId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for RevId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Stable document identifier, allocated once when a document is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocId(uuid::Uuid);

impl DocId {
    /// Allocate a fresh document identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl std::fmt::Display for DocId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for DocId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

/// Name of a replica
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(String);

impl StoreId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StoreId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for StoreId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// Reference from a revision to one of its part blobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRef {
    /// Content hash of the blob
    pub id: ObjectId,
    /// Uncompressed blob length
    pub size: u64,
}

/// Immutable revision record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    /// Parent revision IDs (empty for a document's first revision)
    pub parents: Vec<RevId>,
    /// Type code, e.g. `public.data`
    pub type_code: String,
    /// Creator code of the application that wrote the revision
    pub creator: String,
    /// Modification timestamp (Unix seconds)
    pub mtime: i64,
    /// Named parts, sorted for deterministic hashing
    pub parts: BTreeMap<String, PartRef>,
}

/// Feed a length-prefixed field into the hasher, so adjacent fields cannot
/// run into each other
fn hash_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

impl Revision {
    /// Create a new revision record stamped with the current time
    pub fn new(
        parents: Vec<RevId>,
        type_code: String,
        creator: String,
        parts: BTreeMap<String, PartRef>,
    ) -> Self {
        Self {
            parents,
            type_code,
            creator,
            mtime: chrono::Utc::now().timestamp(),
            parts,
        }
    }

    /// Build a revision record over in-memory part contents
    pub fn from_contents<B: AsRef<[u8]>>(
        parents: Vec<RevId>,
        type_code: String,
        creator: String,
        contents: &BTreeMap<String, B>,
    ) -> Self {
        let parts = contents
            .iter()
            .map(|(name, data)| {
                let data = data.as_ref();
                let part = PartRef {
                    id: ObjectId::from_data(data),
                    size: data.len() as u64,
                };
                (name.clone(), part)
            })
            .collect();
        Self::new(parents, type_code, creator, parts)
    }

    /// Compute the revision ID from parents, type, creator and part hashes.
    /// `mtime` is not part of it.
    pub fn id(&self) -> RevId {
        let mut hasher = Sha256::new();
        hasher.update((self.parents.len() as u64).to_le_bytes());
        for parent in &self.parents {
            hasher.update(parent.as_bytes());
        }
        hash_field(&mut hasher, self.type_code.as_bytes());
        hash_field(&mut hasher, self.creator.as_bytes());
        hasher.update((self.parts.len() as u64).to_le_bytes());
        for (name, part) in &self.parts {
            hash_field(&mut hasher, name.as_bytes());
            hasher.update(part.id.as_bytes());
        }
        RevId(ObjectId(hasher.finalize().into()))
    }

    /// Serialize to binary format
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary format
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }

    /// Check if this is a document's first revision (no parents)
    pub fn is_initial(&self) -> bool {
        self.parents.is_empty()
    }

    /// Modification time as a UTC timestamp
    pub fn mtime_utc(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::<chrono::Utc>::from_timestamp(self.mtime, 0).unwrap_or_default()
    }

    /// Part names in sorted order
    pub fn part_names(&self) -> Vec<String> {
        self.parts.keys().cloned().collect()
    }
}
