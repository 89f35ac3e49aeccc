//! Sync engine
//!
//! Reconciles the head sets a document has on several stores into a single
//! head. Heads related by ancestry fast-forward to the newest one, which is
//! then copied to, and registered on, every target store. Heads with no
//! ancestry relation are reported as a conflict and no store is touched.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::graph::{reconcile, RevisionGraph, SyncOutcome};
use crate::object::{DocId, RevId};
use crate::registry::RegistryOp;
use crate::replication::{copy_closure, fetch_revision};
use crate::store::{apply_everywhere, Store};

/// Head set of one target store as observed at the start of a sync
#[derive(Debug, Clone)]
pub struct ObservedHeads {
    pub store: Arc<Store>,
    pub heads: Vec<RevId>,
}

pub struct SyncEngine<'a> {
    targets: &'a [Arc<Store>],
}

impl<'a> SyncEngine<'a> {
    pub fn new(targets: &'a [Arc<Store>]) -> Self {
        Self { targets }
    }

    /// Read the head set of `doc` on every target store
    pub async fn observe(&self, doc: DocId) -> Result<Vec<ObservedHeads>> {
        let mut observed = Vec::with_capacity(self.targets.len());
        for store in self.targets {
            let heads = store.registry()?.heads(doc).await?;
            observed.push(ObservedHeads {
                store: store.clone(),
                heads,
            });
        }
        Ok(observed)
    }

    /// Load the ancestry of `candidates` from the target stores
    pub async fn load_graph(&self, candidates: &[RevId]) -> Result<RevisionGraph> {
        let mut graph = RevisionGraph::new();
        let mut pending: Vec<RevId> = candidates.to_vec();
        while let Some(id) = pending.pop() {
            if graph.is_loaded(id) {
                continue;
            }
            let revision = fetch_revision(self.targets, id).await?;
            graph.insert(id, &revision.parents);
            pending.extend(
                revision
                    .parents
                    .iter()
                    .copied()
                    .filter(|parent| !graph.is_loaded(*parent)),
            );
        }
        Ok(graph)
    }

    /// Reconcile `doc` across the target stores.
    ///
    /// On `Resolved` every target lists exactly the resolved head afterwards.
    /// On `Conflict` no registry was modified.
    pub async fn sync(&self, doc: DocId) -> Result<SyncOutcome> {
        for store in self.targets {
            store.ping()?;
        }

        let observed = self.observe(doc).await?;
        let mut candidates: Vec<RevId> = Vec::new();
        for entry in &observed {
            for head in &entry.heads {
                if !candidates.contains(head) {
                    candidates.push(*head);
                }
            }
        }
        if candidates.is_empty() {
            return Err(Error::not_found(format!(
                "document {} on the requested stores",
                doc
            )));
        }

        let outcome = if candidates.len() == 1 {
            SyncOutcome::Resolved(candidates[0])
        } else {
            let graph = self.load_graph(&candidates).await?;
            reconcile(&graph, &candidates)
        };

        match &outcome {
            SyncOutcome::Resolved(head) => self.propagate(doc, *head, &observed).await?,
            SyncOutcome::Conflict(heads) => {
                tracing::warn!("Document {} has {} divergent heads", doc, heads.len());
            }
        }
        Ok(outcome)
    }

    async fn propagate(&self, doc: DocId, head: RevId, observed: &[ObservedHeads]) -> Result<()> {
        let mut batches = Vec::new();
        for entry in observed {
            if entry.heads == [head] {
                continue;
            }
            copy_closure(head, self.targets, &entry.store).await?;
            batches.push((
                entry.store.clone(),
                vec![RegistryOp::ReplaceHeads {
                    expected: entry.heads.clone(),
                    new: vec![head],
                }],
            ));
        }

        if batches.is_empty() {
            tracing::debug!("Document {} already consistent at {}", doc, head);
            return Ok(());
        }
        apply_everywhere(doc, &batches).await?;
        tracing::info!(
            "Document {} synced to {} on {} store(s)",
            doc,
            head,
            batches.len()
        );
        Ok(())
    }
}
