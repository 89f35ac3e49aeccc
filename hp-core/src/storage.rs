//! Storage abstraction layer for hotchpotch
//!
//! Holds revision records and content-addressed part blobs for a single
//! replica. Two backends are provided: an in-memory map and a sled database.

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::object::{ObjectId, RevId, Revision};

/// zstd level used for part blobs on disk
const PART_COMPRESSION_LEVEL: i32 = 3;

/// Generic object store interface
///
/// All storage backends must implement this trait
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store a part blob (returns its content hash)
    async fn put_part(&self, data: Bytes) -> Result<ObjectId>;

    /// Get part blob by content hash
    async fn get_part(&self, id: ObjectId) -> Result<Bytes>;

    /// Check if a part blob exists
    async fn has_part(&self, id: ObjectId) -> Result<bool>;

    /// Store a revision record under its id
    async fn put_revision(&self, id: RevId, revision: &Revision) -> Result<()>;

    /// Get revision record by id
    async fn get_revision(&self, id: RevId) -> Result<Revision>;

    /// Check if a revision record exists
    async fn has_revision(&self, id: RevId) -> Result<bool>;

    /// Delete a revision record, returning whether it existed
    async fn delete_revision(&self, id: RevId) -> Result<bool>;

    /// List all revision ids
    async fn list_revisions(&self) -> Result<Vec<RevId>>;
}

/// In-memory object store
#[derive(Default)]
pub struct MemoryObjectStore {
    revisions: RwLock<HashMap<RevId, Revision>>,
    parts: RwLock<HashMap<ObjectId, Bytes>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_part(&self, data: Bytes) -> Result<ObjectId> {
        let id = ObjectId::from_data(&data);
        self.parts.write().await.entry(id).or_insert(data);
        Ok(id)
    }

    async fn get_part(&self, id: ObjectId) -> Result<Bytes> {
        self.parts
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("part blob {}", id)))
    }

    async fn has_part(&self, id: ObjectId) -> Result<bool> {
        Ok(self.parts.read().await.contains_key(&id))
    }

    async fn put_revision(&self, id: RevId, revision: &Revision) -> Result<()> {
        self.revisions
            .write()
            .await
            .entry(id)
            .or_insert_with(|| revision.clone());
        Ok(())
    }

    async fn get_revision(&self, id: RevId) -> Result<Revision> {
        self.revisions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("revision {}", id)))
    }

    async fn has_revision(&self, id: RevId) -> Result<bool> {
        Ok(self.revisions.read().await.contains_key(&id))
    }

    async fn delete_revision(&self, id: RevId) -> Result<bool> {
        Ok(self.revisions.write().await.remove(&id).is_some())
    }

    async fn list_revisions(&self) -> Result<Vec<RevId>> {
        let mut ids: Vec<RevId> = self.revisions.read().await.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

/// Disk object store on sled
///
/// Layout:
/// ```text
/// revisions: rev id (32 bytes) -> bincode(Revision)
/// parts:     object id (32 bytes) -> zstd(blob)
/// ```
pub struct DiskObjectStore {
    revisions: sled::Tree,
    parts: sled::Tree,
    /// Decoded revision records
    cache: Mutex<LruCache<RevId, Revision>>,
}

impl DiskObjectStore {
    /// Open the object trees inside an existing sled database
    pub fn open(db: &sled::Db, cache_capacity: usize) -> Result<Self> {
        let revisions = db.open_tree("revisions")?;
        let parts = db.open_tree("parts")?;
        let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            revisions,
            parts,
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    fn cached(&self, id: &RevId) -> Option<Revision> {
        self.cache.lock().ok()?.get(id).cloned()
    }

    fn remember(&self, id: RevId, revision: Revision) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(id, revision);
        }
    }

    fn forget(&self, id: &RevId) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.pop(id);
        }
    }
}

#[async_trait]
impl ObjectStore for DiskObjectStore {
    async fn put_part(&self, data: Bytes) -> Result<ObjectId> {
        let id = ObjectId::from_data(&data);
        if self.parts.contains_key(id.as_bytes())? {
            return Ok(id); // content-addressed, already stored
        }
        let compressed = zstd::encode_all(&data[..], PART_COMPRESSION_LEVEL)?;
        self.parts.insert(id.as_bytes(), compressed)?;
        Ok(id)
    }

    async fn get_part(&self, id: ObjectId) -> Result<Bytes> {
        let compressed = self
            .parts
            .get(id.as_bytes())?
            .ok_or_else(|| Error::not_found(format!("part blob {}", id)))?;
        let data = zstd::decode_all(&compressed[..])?;
        Ok(Bytes::from(data))
    }

    async fn has_part(&self, id: ObjectId) -> Result<bool> {
        Ok(self.parts.contains_key(id.as_bytes())?)
    }

    async fn put_revision(&self, id: RevId, revision: &Revision) -> Result<()> {
        if self.revisions.contains_key(id.as_bytes())? {
            return Ok(());
        }
        self.revisions.insert(id.as_bytes(), revision.to_bytes()?)?;
        self.remember(id, revision.clone());
        Ok(())
    }

    async fn get_revision(&self, id: RevId) -> Result<Revision> {
        if let Some(revision) = self.cached(&id) {
            return Ok(revision);
        }
        let data = self
            .revisions
            .get(id.as_bytes())?
            .ok_or_else(|| Error::not_found(format!("revision {}", id)))?;
        let revision = Revision::from_bytes(&data)?;
        self.remember(id, revision.clone());
        Ok(revision)
    }

    async fn has_revision(&self, id: RevId) -> Result<bool> {
        Ok(self.revisions.contains_key(id.as_bytes())?)
    }

    async fn delete_revision(&self, id: RevId) -> Result<bool> {
        self.forget(&id);
        Ok(self.revisions.remove(id.as_bytes())?.is_some())
    }

    async fn list_revisions(&self) -> Result<Vec<RevId>> {
        let mut ids = Vec::new();
        for item in self.revisions.iter() {
            let (key, _) = item?;
            let bytes = <[u8; 32]>::try_from(&key[..])
                .map_err(|_| Error::Database(format!("Malformed revision key of {} bytes", key.len())))?;
            ids.push(RevId::new(bytes));
        }
        Ok(ids)
    }
}
