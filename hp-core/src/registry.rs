//! Document registry
//!
//! Per replica, maps each document to its head set and its outstanding
//! pre-revisions. Every mutation is expressed as a batch of [`RegistryOp`]s
//! applied atomically for one document: readers never see a head set
//! mid-transition, and a failing batch leaves the entry untouched.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::object::{DocId, RevId};

/// A suspended revision and the parent(s) it was based on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreRevision {
    pub id: RevId,
    pub parents: Vec<RevId>,
}

/// Registry entry of one document on one store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocEntry {
    heads: Vec<RevId>,
    pre_revisions: Vec<PreRevision>,
}

impl DocEntry {
    /// Head revisions in insertion order
    pub fn heads(&self) -> &[RevId] {
        &self.heads
    }

    pub fn pre_revisions(&self) -> &[PreRevision] {
        &self.pre_revisions
    }

    pub fn pre_revision_ids(&self) -> Vec<RevId> {
        self.pre_revisions.iter().map(|pre| pre.id).collect()
    }

    pub fn pre_revision(&self, id: RevId) -> Option<&PreRevision> {
        self.pre_revisions.iter().find(|pre| pre.id == id)
    }

    pub fn is_head(&self, id: RevId) -> bool {
        self.heads.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.heads.is_empty() && self.pre_revisions.is_empty()
    }

    fn apply(&mut self, doc: DocId, op: &RegistryOp) -> Result<()> {
        match op {
            RegistryOp::SetHead { new, replaced } => {
                self.heads.retain(|head| !replaced.contains(head));
                if !self.heads.contains(new) {
                    self.heads.push(*new);
                }
            }
            RegistryOp::AddPreRevision {
                id,
                parents,
                replace_same_parents,
            } => {
                if *replace_same_parents {
                    self.pre_revisions.retain(|pre| &pre.parents != parents);
                }
                if self.pre_revision(*id).is_none() {
                    self.pre_revisions.push(PreRevision {
                        id: *id,
                        parents: parents.clone(),
                    });
                }
            }
            RegistryOp::RemovePreRevision { id } => {
                let before = self.pre_revisions.len();
                self.pre_revisions.retain(|pre| pre.id != *id);
                if self.pre_revisions.len() == before {
                    return Err(Error::invalid_state(format!(
                        "{} is not a pre-revision of document {}",
                        id, doc
                    )));
                }
            }
            RegistryOp::ReplaceHeads { expected, new } => {
                if !same_members(&self.heads, expected) {
                    return Err(Error::invalid_state(format!(
                        "Head set of document {} changed concurrently",
                        doc
                    )));
                }
                self.heads = new.clone();
            }
            RegistryOp::DropRevision { id } => {
                let before = self.heads.len() + self.pre_revisions.len();
                self.heads.retain(|head| head != id);
                self.pre_revisions.retain(|pre| pre.id != *id);
                if self.heads.len() + self.pre_revisions.len() == before {
                    return Err(Error::not_found(format!(
                        "revision {} in document {}",
                        id, doc
                    )));
                }
            }
        }
        Ok(())
    }
}

fn ensure_unchanged(doc: DocId, current: Option<&DocEntry>, expected: Option<&DocEntry>) -> Result<()> {
    if current == expected {
        Ok(())
    } else {
        Err(Error::invalid_state(format!(
            "Entry of document {} changed since it was written",
            doc
        )))
    }
}

fn same_members(a: &[RevId], b: &[RevId]) -> bool {
    a.len() == b.len() && a.iter().all(|id| b.contains(id))
}

/// One registry mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryOp {
    /// Replace the `replaced` members of the head set with `new`
    SetHead { new: RevId, replaced: Vec<RevId> },
    /// Register a suspended revision
    AddPreRevision {
        id: RevId,
        parents: Vec<RevId>,
        /// Drop existing pre-revisions with identical parents first
        replace_same_parents: bool,
    },
    /// Unregister a pre-revision; fails if `id` is not one
    RemovePreRevision { id: RevId },
    /// Compare-and-set of the whole head set
    ReplaceHeads { expected: Vec<RevId>, new: Vec<RevId> },
    /// Remove a revision from both the head set and the pre-revisions
    DropRevision { id: RevId },
}

/// Apply a batch to a copy of `entry`. Empty results are mapped to `None`.
pub fn apply_ops(doc: DocId, entry: Option<&DocEntry>, ops: &[RegistryOp]) -> Result<Option<DocEntry>> {
    let mut next = entry.cloned().unwrap_or_default();
    for op in ops {
        next.apply(doc, op)?;
    }
    Ok(if next.is_empty() { None } else { Some(next) })
}

/// Outcome of an applied batch: the entry before and after it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryChange {
    pub previous: Option<DocEntry>,
    pub written: Option<DocEntry>,
}

/// Storage seam for document registries
#[async_trait]
pub trait DocumentRegistry: Send + Sync {
    /// Current entry of a document, if this store holds it
    async fn entry(&self, doc: DocId) -> Result<Option<DocEntry>>;

    /// Apply `ops` atomically
    async fn apply(&self, doc: DocId, ops: &[RegistryOp]) -> Result<RegistryChange>;

    /// Put back `previous` if the entry still equals `expected`.
    ///
    /// Fails with `InvalidState` and leaves the entry alone when another
    /// writer changed it in the meantime.
    async fn restore(&self, doc: DocId, expected: Option<&DocEntry>, previous: Option<DocEntry>) -> Result<()>;

    /// All documents known to this registry
    async fn documents(&self) -> Result<Vec<DocId>>;

    async fn heads(&self, doc: DocId) -> Result<Vec<RevId>> {
        Ok(self
            .entry(doc)
            .await?
            .map(|entry| entry.heads)
            .unwrap_or_default())
    }

    async fn pre_revisions(&self, doc: DocId) -> Result<Vec<RevId>> {
        Ok(self
            .entry(doc)
            .await?
            .map(|entry| entry.pre_revision_ids())
            .unwrap_or_default())
    }

    async fn set_head(&self, doc: DocId, new: RevId, replaced: &[RevId]) -> Result<()> {
        let op = RegistryOp::SetHead {
            new,
            replaced: replaced.to_vec(),
        };
        self.apply(doc, &[op]).await.map(|_| ())
    }

    async fn add_pre_revision(&self, doc: DocId, id: RevId, parents: &[RevId]) -> Result<()> {
        let op = RegistryOp::AddPreRevision {
            id,
            parents: parents.to_vec(),
            replace_same_parents: false,
        };
        self.apply(doc, &[op]).await.map(|_| ())
    }

    async fn remove_pre_revision(&self, doc: DocId, id: RevId) -> Result<()> {
        self.apply(doc, &[RegistryOp::RemovePreRevision { id }])
            .await
            .map(|_| ())
    }

    /// Unregister a pre-revision; heads and unknown ids are rejected
    async fn forget(&self, doc: DocId, id: RevId) -> Result<()> {
        self.remove_pre_revision(doc, id).await
    }
}

/// In-memory registry
#[derive(Default)]
pub struct MemoryRegistry {
    docs: RwLock<BTreeMap<DocId, DocEntry>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentRegistry for MemoryRegistry {
    async fn entry(&self, doc: DocId) -> Result<Option<DocEntry>> {
        Ok(self.docs.read().await.get(&doc).cloned())
    }

    async fn apply(&self, doc: DocId, ops: &[RegistryOp]) -> Result<RegistryChange> {
        let mut docs = self.docs.write().await;
        let previous = docs.get(&doc).cloned();
        let written = apply_ops(doc, previous.as_ref(), ops)?;
        match &written {
            Some(next) => docs.insert(doc, next.clone()),
            None => docs.remove(&doc),
        };
        Ok(RegistryChange { previous, written })
    }

    async fn restore(&self, doc: DocId, expected: Option<&DocEntry>, previous: Option<DocEntry>) -> Result<()> {
        let mut docs = self.docs.write().await;
        ensure_unchanged(doc, docs.get(&doc), expected)?;
        match previous {
            Some(entry) => docs.insert(doc, entry),
            None => docs.remove(&doc),
        };
        Ok(())
    }

    async fn documents(&self) -> Result<Vec<DocId>> {
        Ok(self.docs.read().await.keys().copied().collect())
    }
}

/// Registry persisted in the `documents` tree of a sled database
pub struct DiskRegistry {
    documents: sled::Tree,
    /// Serializes read-modify-write batches
    write_lock: Mutex<()>,
}

impl DiskRegistry {
    pub fn open(db: &sled::Db) -> Result<Self> {
        Ok(Self {
            documents: db.open_tree("documents")?,
            write_lock: Mutex::new(()),
        })
    }

    fn load(&self, doc: DocId) -> Result<Option<DocEntry>> {
        match self.documents.get(doc.as_bytes())? {
            Some(data) => Ok(Some(bincode::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    fn store(&self, doc: DocId, entry: Option<&DocEntry>) -> Result<()> {
        match entry {
            Some(entry) => {
                self.documents
                    .insert(doc.as_bytes(), bincode::serialize(entry)?)?;
            }
            None => {
                self.documents.remove(doc.as_bytes())?;
            }
        }
        self.documents.flush()?;
        Ok(())
    }
}

#[async_trait]
impl DocumentRegistry for DiskRegistry {
    async fn entry(&self, doc: DocId) -> Result<Option<DocEntry>> {
        self.load(doc)
    }

    async fn apply(&self, doc: DocId, ops: &[RegistryOp]) -> Result<RegistryChange> {
        let _guard = self.write_lock.lock().await;
        let previous = self.load(doc)?;
        let written = apply_ops(doc, previous.as_ref(), ops)?;
        self.store(doc, written.as_ref())?;
        Ok(RegistryChange { previous, written })
    }

    async fn restore(&self, doc: DocId, expected: Option<&DocEntry>, previous: Option<DocEntry>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        ensure_unchanged(doc, self.load(doc)?.as_ref(), expected)?;
        self.store(doc, previous.as_ref())
    }

    async fn documents(&self) -> Result<Vec<DocId>> {
        let mut docs = Vec::new();
        for key in self.documents.iter().keys() {
            let key = key?;
            let bytes = <[u8; 16]>::try_from(&key[..]).map_err(|_| {
                Error::Database(format!("Malformed document key of {} bytes", key.len()))
            })?;
            docs.push(DocId::from_bytes(bytes));
        }
        Ok(docs)
    }
}
