//! Replica handle
//!
//! A [`Store`] bundles one replica's revision store and document registry.
//! While a store is offline every access fails with `StoreUnavailable`; this
//! is how transport failures reach the writer and sync engine.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::object::{DocId, StoreId};
use crate::registry::{DiskRegistry, DocumentRegistry, MemoryRegistry, RegistryChange, RegistryOp};
use crate::revision_store::RevisionStore;
use crate::storage::{DiskObjectStore, MemoryObjectStore, ObjectStore};

pub struct Store {
    id: StoreId,
    revisions: RevisionStore,
    registry: Arc<dyn DocumentRegistry>,
    online: AtomicBool,
}

impl Store {
    pub fn new(id: StoreId, objects: Arc<dyn ObjectStore>, registry: Arc<dyn DocumentRegistry>) -> Self {
        Self {
            id,
            revisions: RevisionStore::new(objects),
            registry,
            online: AtomicBool::new(true),
        }
    }

    /// Create a volatile store
    pub fn in_memory(id: impl Into<StoreId>) -> Self {
        Self::new(
            id.into(),
            Arc::new(MemoryObjectStore::new()),
            Arc::new(MemoryRegistry::new()),
        )
    }

    /// Open or create a sled-backed store at `path`
    pub fn open_disk(id: impl Into<StoreId>, path: &Path, cache_capacity: usize) -> Result<Self> {
        std::fs::create_dir_all(path)?;
        let db = sled::open(path)
            .map_err(|e| Error::Database(format!("Failed to open store at {:?}: {}", path, e)))?;
        let objects = DiskObjectStore::open(&db, cache_capacity)?;
        let registry = DiskRegistry::open(&db)?;
        Ok(Self::new(id.into(), Arc::new(objects), Arc::new(registry)))
    }

    pub fn id(&self) -> &StoreId {
        &self.id
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Simulate losing (or regaining) the connection to this replica
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn ping(&self) -> Result<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(Error::StoreUnavailable(self.id.clone()))
        }
    }

    pub fn revisions(&self) -> Result<&RevisionStore> {
        self.ping()?;
        Ok(&self.revisions)
    }

    pub fn registry(&self) -> Result<&dyn DocumentRegistry> {
        self.ping()?;
        Ok(self.registry.as_ref())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.id)
            .field("online", &self.is_online())
            .finish()
    }
}

/// Apply one registry batch per store, all or nothing.
///
/// Stores are updated in order; if one fails, the stores already updated
/// are restored to the entry they held before and the error is returned.
/// A store whose entry was changed by another writer after this batch
/// landed keeps that change; the skipped rollback is logged.
pub async fn apply_everywhere(doc: DocId, batches: &[(Arc<Store>, Vec<RegistryOp>)]) -> Result<()> {
    for (store, _) in batches {
        store.ping()?;
    }

    let mut applied: Vec<(&Arc<Store>, RegistryChange)> = Vec::with_capacity(batches.len());
    for (store, ops) in batches {
        let outcome = match store.registry() {
            Ok(registry) => registry.apply(doc, ops).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(change) => applied.push((store, change)),
            Err(e) => {
                tracing::warn!(
                    "Registry update of {} failed on store {}: {}; rolling back {} store(s)",
                    doc,
                    store.id(),
                    e,
                    applied.len()
                );
                for (done, change) in applied.into_iter().rev() {
                    let undo = match done.registry() {
                        Ok(registry) => {
                            registry
                                .restore(doc, change.written.as_ref(), change.previous)
                                .await
                        }
                        Err(e) => Err(e),
                    };
                    if let Err(undo) = undo {
                        tracing::warn!("Rollback on store {} failed: {}", done.id(), undo);
                    }
                }
                return Err(e);
            }
        }
    }
    Ok(())
}
