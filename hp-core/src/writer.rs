//! Writer transaction
//!
//! A single-use builder for one new revision of one document, bound to one or
//! more target stores. All content is buffered in memory until the writer is
//! finalized, so nothing reaches a store before `commit` or `suspend`:
//!
//! - `commit` persists the revision and makes it the document's head
//! - `suspend` persists it as a pre-revision, leaving the heads unchanged
//! - `abort` (or dropping the writer unfinalized) discards everything
//!
//! Exactly one finalization is allowed; anything after it fails with
//! `InvalidState`.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::PreRevisionPolicy;
use crate::error::{Error, Result};
use crate::object::{DocId, RevId, Revision, StoreId};
use crate::registry::RegistryOp;
use crate::replication::{copy_closure, find_holder};
use crate::store::{apply_everywhere, Store};

/// How a writer was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterMode {
    /// First revision of a new document
    Create,
    /// First revision of a new document derived from `source`
    Fork { source: RevId },
    /// Next revision of an existing document
    Update { base: RevId },
    /// Continuation of a suspended revision
    Resume { pre_revision: RevId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Open,
    Committed(RevId),
    Suspended(RevId),
    Aborted,
}

/// Initial state handed to a writer by the connector
pub(crate) struct WriterSeed {
    pub doc: DocId,
    pub mode: WriterMode,
    pub targets: Vec<Arc<Store>>,
    /// Stores missing history may be copied from; includes the targets
    pub sources: Vec<Arc<Store>>,
    pub parents: Vec<RevId>,
    pub type_code: String,
    pub creator: String,
    pub contents: BTreeMap<String, Bytes>,
    pub policy: PreRevisionPolicy,
}

pub struct Writer {
    doc: DocId,
    mode: WriterMode,
    targets: Vec<Arc<Store>>,
    sources: Vec<Arc<Store>>,
    parents: Vec<RevId>,
    type_code: String,
    creator: String,
    contents: BTreeMap<String, Vec<u8>>,
    policy: PreRevisionPolicy,
    state: WriterState,
}

impl Writer {
    pub(crate) fn open(seed: WriterSeed) -> Self {
        tracing::debug!(
            "Opened {:?} writer on document {} for {} store(s)",
            seed.mode,
            seed.doc,
            seed.targets.len()
        );
        Self {
            doc: seed.doc,
            mode: seed.mode,
            targets: seed.targets,
            sources: seed.sources,
            parents: seed.parents,
            type_code: seed.type_code,
            creator: seed.creator,
            contents: seed
                .contents
                .into_iter()
                .map(|(name, data)| (name, data.to_vec()))
                .collect(),
            policy: seed.policy,
            state: WriterState::Open,
        }
    }

    fn ensure_open(&self, operation: &str) -> Result<()> {
        match self.state {
            WriterState::Open => Ok(()),
            state => Err(Error::invalid_state(format!(
                "Cannot {} on writer for document {}: already {:?}",
                operation, self.doc, state
            ))),
        }
    }

    /// Document this writer produces a revision of
    pub fn doc(&self) -> DocId {
        self.doc
    }

    /// The committed or suspended revision, once finalized
    pub fn rev(&self) -> Option<RevId> {
        match self.state {
            WriterState::Committed(id) | WriterState::Suspended(id) => Some(id),
            WriterState::Open | WriterState::Aborted => None,
        }
    }

    pub fn mode(&self) -> WriterMode {
        self.mode
    }

    pub fn is_finalized(&self) -> bool {
        self.state != WriterState::Open
    }

    pub fn target_stores(&self) -> Vec<StoreId> {
        self.targets.iter().map(|store| store.id().clone()).collect()
    }

    pub fn get_type(&self) -> &str {
        &self.type_code
    }

    pub fn set_type(&mut self, type_code: impl Into<String>) -> Result<()> {
        self.ensure_open("set type")?;
        self.type_code = type_code.into();
        Ok(())
    }

    pub fn get_creator(&self) -> &str {
        &self.creator
    }

    pub fn parents(&self) -> &[RevId] {
        &self.parents
    }

    /// Append `data` to a part, creating it if needed
    pub fn write(&mut self, part: &str, data: &[u8]) -> Result<()> {
        self.ensure_open("write")?;
        self.contents
            .entry(part.to_string())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    /// Replace a part's content wholesale
    pub fn write_all(&mut self, part: &str, data: &[u8]) -> Result<()> {
        self.ensure_open("write")?;
        self.contents.insert(part.to_string(), data.to_vec());
        Ok(())
    }

    /// Current content of a part
    pub fn read_all(&self, part: &str) -> Result<&[u8]> {
        self.contents
            .get(part)
            .map(|data| data.as_slice())
            .ok_or_else(|| Error::not_found(format!("part '{}' in writer for {}", part, self.doc)))
    }

    /// Drop a part; returns whether it existed
    pub fn remove_part(&mut self, part: &str) -> Result<bool> {
        self.ensure_open("remove part")?;
        Ok(self.contents.remove(part).is_some())
    }

    pub fn parts(&self) -> Vec<&str> {
        self.contents.keys().map(|name| name.as_str()).collect()
    }

    /// Override the implicit parent(s), e.g. to record a merge.
    ///
    /// Every parent must be held by at least one reachable target store.
    pub async fn set_parents(&mut self, parents: Vec<RevId>) -> Result<()> {
        self.ensure_open("set parents")?;
        if parents.is_empty() {
            return Err(Error::invalid_state("Parent list must not be empty"));
        }

        let mut unique = Vec::with_capacity(parents.len());
        for parent in parents {
            if unique.contains(&parent) {
                continue;
            }
            if find_holder(&self.targets, parent).await.is_err() {
                return Err(Error::invalid_state(format!(
                    "Parent {} is not held by any target store of document {}",
                    parent, self.doc
                )));
            }
            unique.push(parent);
        }
        self.parents = unique;
        Ok(())
    }

    /// Write the revision (and any history the targets lack) to every target.
    /// Registries are not touched here.
    async fn persist(&self) -> Result<RevId> {
        for store in &self.targets {
            store.ping()?;
        }

        let contents: BTreeMap<String, Bytes> = self
            .contents
            .iter()
            .map(|(name, data)| (name.clone(), Bytes::copy_from_slice(data)))
            .collect();
        let revision = Revision::from_contents(
            self.parents.clone(),
            self.type_code.clone(),
            self.creator.clone(),
            &contents,
        );

        let id = revision.id();
        for store in &self.targets {
            for parent in &self.parents {
                copy_closure(*parent, &self.sources, store).await?;
            }
            store.revisions()?.put(&revision, &contents).await?;
        }
        Ok(id)
    }

    fn batches(&self, ops: Vec<RegistryOp>) -> Vec<(Arc<Store>, Vec<RegistryOp>)> {
        self.targets
            .iter()
            .map(|store| (store.clone(), ops.clone()))
            .collect()
    }

    /// Persist the revision and make it the document's head on every target.
    ///
    /// All-or-nothing across the targets. On failure the writer stays open.
    pub async fn commit(&mut self) -> Result<RevId> {
        self.ensure_open("commit")?;
        let id = self.persist().await?;

        let mut ops = Vec::with_capacity(2);
        if let WriterMode::Resume { pre_revision } = self.mode {
            ops.push(RegistryOp::RemovePreRevision { id: pre_revision });
        }
        ops.push(RegistryOp::SetHead {
            new: id,
            replaced: self.parents.clone(),
        });
        apply_everywhere(self.doc, &self.batches(ops)).await?;

        self.state = WriterState::Committed(id);
        self.contents.clear();
        tracing::info!(
            "Committed revision {} of document {} to {} store(s)",
            id,
            self.doc,
            self.targets.len()
        );
        Ok(id)
    }

    /// Persist the revision as a pre-revision; heads stay unchanged.
    ///
    /// A resumed pre-revision is replaced by the new one.
    pub async fn suspend(&mut self) -> Result<RevId> {
        self.ensure_open("suspend")?;
        let id = self.persist().await?;

        let mut ops = Vec::with_capacity(2);
        if let WriterMode::Resume { pre_revision } = self.mode {
            ops.push(RegistryOp::RemovePreRevision { id: pre_revision });
        }
        ops.push(RegistryOp::AddPreRevision {
            id,
            parents: self.parents.clone(),
            replace_same_parents: self.policy == PreRevisionPolicy::ReplaceSameParent,
        });
        apply_everywhere(self.doc, &self.batches(ops)).await?;

        self.state = WriterState::Suspended(id);
        self.contents.clear();
        tracing::info!("Suspended revision {} of document {}", id, self.doc);
        Ok(id)
    }

    /// Discard the writer without touching any store
    pub fn abort(&mut self) -> Result<()> {
        self.ensure_open("abort")?;
        self.discard();
        tracing::debug!("Aborted writer on document {}", self.doc);
        Ok(())
    }

    fn discard(&mut self) {
        self.state = WriterState::Aborted;
        self.contents.clear();
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if self.state == WriterState::Open {
            tracing::debug!(
                "Writer on document {} released without commit or suspend; aborting",
                self.doc
            );
            self.discard();
        }
    }
}
