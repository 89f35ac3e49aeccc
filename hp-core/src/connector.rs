//! Connector facade
//!
//! Orchestrates writers, the sync engine and read-only queries across every
//! mounted store. This is the surface external collaborators (GUI shells,
//! scripts, the `hp` CLI) program against.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::{ConnectorConfig, PreRevisionPolicy, StoreBackendConfig};
use crate::error::{Error, Result};
use crate::graph::SyncOutcome;
use crate::object::{DocId, RevId, Revision, StoreId};
use crate::registry::{DocEntry, RegistryOp};
use crate::replication::{fetch_revision, find_holder};
use crate::store::{apply_everywhere, Store};
use crate::sync::SyncEngine;
use crate::writer::{Writer, WriterMode, WriterSeed};

/// Metadata of one revision plus the stores currently holding it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionStat {
    id: RevId,
    revision: Revision,
    stores: Vec<StoreId>,
}

impl RevisionStat {
    pub fn id(&self) -> RevId {
        self.id
    }

    pub fn creator(&self) -> &str {
        &self.revision.creator
    }

    pub fn type_code(&self) -> &str {
        &self.revision.type_code
    }

    pub fn mtime(&self) -> chrono::DateTime<chrono::Utc> {
        self.revision.mtime_utc()
    }

    pub fn parents(&self) -> &[RevId] {
        &self.revision.parents
    }

    pub fn parts(&self) -> Vec<&str> {
        self.revision.parts.keys().map(|name| name.as_str()).collect()
    }

    /// Size of each part in bytes
    pub fn sizes(&self) -> BTreeMap<&str, u64> {
        self.revision
            .parts
            .iter()
            .map(|(name, part)| (name.as_str(), part.size))
            .collect()
    }

    pub fn size(&self, part: &str) -> Option<u64> {
        self.revision.parts.get(part).map(|part| part.size)
    }

    pub fn stores(&self) -> &[StoreId] {
        &self.stores
    }
}

/// Registry view of one document across the reachable stores
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocLookup {
    doc: DocId,
    entries: Vec<(StoreId, DocEntry)>,
}

impl DocLookup {
    pub fn doc(&self) -> DocId {
        self.doc
    }

    /// Union of the head sets; more than one only under unresolved conflict
    pub fn revs(&self) -> Vec<RevId> {
        let mut revs = Vec::new();
        for (_, entry) in &self.entries {
            for head in entry.heads() {
                if !revs.contains(head) {
                    revs.push(*head);
                }
            }
        }
        revs
    }

    /// Union of the pre-revisions
    pub fn pre_revs(&self) -> Vec<RevId> {
        let mut pre_revs = Vec::new();
        for (_, entry) in &self.entries {
            for pre in entry.pre_revisions() {
                if !pre_revs.contains(&pre.id) {
                    pre_revs.push(pre.id);
                }
            }
        }
        pre_revs
    }

    /// Head known to one specific store
    pub fn rev(&self, store: &StoreId) -> Option<RevId> {
        self.entry(store)
            .and_then(|entry| entry.heads().first().copied())
    }

    pub fn entry(&self, store: &StoreId) -> Option<&DocEntry> {
        self.entries
            .iter()
            .find(|(id, _)| id == store)
            .map(|(_, entry)| entry)
    }

    pub fn stores(&self) -> Vec<StoreId> {
        self.entries.iter().map(|(id, _)| id.clone()).collect()
    }
}

/// Read access to a stored revision
pub struct RevisionReader {
    id: RevId,
    store: Arc<Store>,
    revision: Revision,
}

impl RevisionReader {
    pub fn id(&self) -> RevId {
        self.id
    }

    pub fn revision(&self) -> &Revision {
        &self.revision
    }

    /// Store the content is read from
    pub fn store(&self) -> &StoreId {
        self.store.id()
    }

    pub fn parts(&self) -> Vec<&str> {
        self.revision.parts.keys().map(|name| name.as_str()).collect()
    }

    pub fn size(&self, part: &str) -> Option<u64> {
        self.revision.parts.get(part).map(|part| part.size)
    }

    pub async fn read_all(&self, part: &str) -> Result<Bytes> {
        self.store.revisions()?.read(self.id, part).await
    }
}

pub struct Connector {
    stores: RwLock<Vec<Arc<Store>>>,
    policy: PreRevisionPolicy,
}

impl Default for Connector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector {
    pub fn new() -> Self {
        Self::with_policy(PreRevisionPolicy::default())
    }

    pub fn with_policy(policy: PreRevisionPolicy) -> Self {
        Self {
            stores: RwLock::new(Vec::new()),
            policy,
        }
    }

    /// Open every store named in `config`
    pub async fn from_config(config: &ConnectorConfig) -> Result<Self> {
        let connector = Self::with_policy(config.pre_revision_policy);
        for store in &config.stores {
            let opened = match &store.backend {
                StoreBackendConfig::Memory => Store::in_memory(store.id.clone()),
                StoreBackendConfig::Disk { path } => {
                    Store::open_disk(store.id.clone(), path, config.revision_cache_capacity)?
                }
            };
            connector.add_store(opened).await?;
        }
        Ok(connector)
    }

    pub fn policy(&self) -> PreRevisionPolicy {
        self.policy
    }

    /// Make a store available to the connector
    pub async fn add_store(&self, store: Store) -> Result<Arc<Store>> {
        let mut stores = self.stores.write().await;
        if stores.iter().any(|existing| existing.id() == store.id()) {
            return Err(Error::invalid_state(format!(
                "Store {} is already mounted",
                store.id()
            )));
        }
        tracing::info!("Mounted store {}", store.id());
        let store = Arc::new(store);
        stores.push(store.clone());
        Ok(store)
    }

    pub async fn remove_store(&self, id: &StoreId) -> Option<Arc<Store>> {
        let mut stores = self.stores.write().await;
        let pos = stores.iter().position(|store| store.id() == id)?;
        tracing::info!("Unmounted store {}", id);
        Some(stores.remove(pos))
    }

    pub async fn store(&self, id: &StoreId) -> Result<Arc<Store>> {
        self.stores
            .read()
            .await
            .iter()
            .find(|store| store.id() == id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("store {}", id)))
    }

    /// All mounted stores, in mount order
    pub async fn stores(&self) -> Vec<Arc<Store>> {
        self.stores.read().await.clone()
    }

    async fn resolve_stores(&self, ids: &[StoreId]) -> Result<Vec<Arc<Store>>> {
        let mut resolved: Vec<Arc<Store>> = Vec::with_capacity(ids.len());
        for id in ids {
            let store = self.store(id).await?;
            if !resolved.iter().any(|s| s.id() == store.id()) {
                resolved.push(store);
            }
        }
        Ok(resolved)
    }

    /// Registry entries of `doc` on every mounted store that holds it.
    ///
    /// Fails with `StoreUnavailable` if a mounted store cannot be asked, so
    /// mutations never silently leave a replica behind.
    async fn entries(&self, doc: DocId) -> Result<Vec<(Arc<Store>, DocEntry)>> {
        self.collect_entries(doc, false).await
    }

    /// Like [`Self::entries`], but unreachable stores are skipped
    async fn reachable_entries(&self, doc: DocId) -> Result<Vec<(Arc<Store>, DocEntry)>> {
        self.collect_entries(doc, true).await
    }

    async fn collect_entries(&self, doc: DocId, skip_offline: bool) -> Result<Vec<(Arc<Store>, DocEntry)>> {
        let stores = self.stores().await;
        let lookups = stores.iter().map(|store| async move {
            if skip_offline && !store.is_online() {
                tracing::debug!("Store {} unreachable, skipping it for {}", store.id(), doc);
                return Ok(None);
            }
            let entry = store.registry()?.entry(doc).await?;
            Ok::<_, Error>(entry.map(|entry| (store.clone(), entry)))
        });
        let found = futures::future::try_join_all(lookups).await?;
        Ok(found.into_iter().flatten().collect())
    }

    /// Mounted stores holding revision `rev`; an unreachable store fails the
    /// call unless `skip_offline` is set
    async fn holders(&self, rev: RevId, skip_offline: bool) -> Result<Vec<Arc<Store>>> {
        let mut holders = Vec::new();
        for store in self.stores().await {
            if skip_offline && !store.is_online() {
                continue;
            }
            if store.revisions()?.contains(rev).await? {
                holders.push(store);
            }
        }
        Ok(holders)
    }

    /// Start a new document
    pub async fn create(&self, type_code: &str, creator: &str, stores: &[StoreId]) -> Result<Writer> {
        let targets = self.resolve_stores(stores).await?;
        if targets.is_empty() {
            return Err(Error::invalid_state("A new document needs at least one store"));
        }
        Ok(Writer::open(WriterSeed {
            doc: DocId::generate(),
            mode: WriterMode::Create,
            sources: self.stores().await,
            targets,
            parents: Vec::new(),
            type_code: type_code.to_string(),
            creator: creator.to_string(),
            contents: BTreeMap::new(),
            policy: self.policy,
        }))
    }

    /// Start a new document whose first revision derives from `source`
    pub async fn fork(&self, source: RevId, creator: &str) -> Result<Writer> {
        let targets = self.holders(source, false).await?;
        let holder = targets
            .first()
            .ok_or_else(|| Error::not_found(format!("revision {}", source)))?;
        let revisions = holder.revisions()?;
        let revision = revisions.get(source).await?;
        let contents = revisions.read_all(source).await?;

        Ok(Writer::open(WriterSeed {
            doc: DocId::generate(),
            mode: WriterMode::Fork { source },
            parents: vec![source],
            type_code: revision.type_code,
            creator: creator.to_string(),
            contents,
            policy: self.policy,
            sources: self.stores().await,
            targets,
        }))
    }

    /// Start the next revision of `doc` on top of `base`.
    ///
    /// Without explicit stores the writer targets the stores where `base` is
    /// a head of `doc`, falling back to the stores of `doc` that hold `base`.
    pub async fn update(
        &self,
        doc: DocId,
        base: RevId,
        creator: Option<&str>,
        stores: Option<&[StoreId]>,
    ) -> Result<Writer> {
        let targets = match stores {
            Some(ids) => self.resolve_stores(ids).await?,
            None => {
                let entries = self.entries(doc).await?;
                let at_head: Vec<Arc<Store>> = entries
                    .iter()
                    .filter(|(_, entry)| entry.is_head(base))
                    .map(|(store, _)| store.clone())
                    .collect();
                if at_head.is_empty() {
                    let mut holding = Vec::new();
                    for (store, _) in entries {
                        if store.revisions()?.contains(base).await? {
                            holding.push(store);
                        }
                    }
                    holding
                } else {
                    at_head
                }
            }
        };
        if targets.is_empty() {
            return Err(Error::not_found(format!(
                "revision {} of document {} on any mounted store",
                base, doc
            )));
        }

        let holder = find_holder(&self.stores().await, base).await?;
        let revisions = holder.revisions()?;
        let revision = revisions.get(base).await?;
        let contents = revisions.read_all(base).await?;

        Ok(Writer::open(WriterSeed {
            doc,
            mode: WriterMode::Update { base },
            parents: vec![base],
            type_code: revision.type_code,
            creator: creator.map(str::to_string).unwrap_or(revision.creator),
            contents,
            policy: self.policy,
            sources: self.stores().await,
            targets,
        }))
    }

    /// Continue a suspended revision.
    ///
    /// The writer inherits the pre-revision's parents, type and creator; the
    /// pre-revision itself never becomes an ancestor.
    pub async fn resume(&self, doc: DocId, pre_revision: RevId) -> Result<Writer> {
        let targets: Vec<Arc<Store>> = self
            .entries(doc)
            .await?
            .into_iter()
            .filter(|(_, entry)| entry.pre_revision(pre_revision).is_some())
            .map(|(store, _)| store)
            .collect();
        if targets.is_empty() {
            return Err(Error::invalid_state(format!(
                "{} is not a pre-revision of document {}",
                pre_revision, doc
            )));
        }

        let holder = find_holder(&targets, pre_revision).await?;
        let revisions = holder.revisions()?;
        let revision = revisions.get(pre_revision).await?;
        let contents = revisions.read_all(pre_revision).await?;

        Ok(Writer::open(WriterSeed {
            doc,
            mode: WriterMode::Resume { pre_revision },
            parents: revision.parents,
            type_code: revision.type_code,
            creator: revision.creator,
            contents,
            policy: self.policy,
            sources: self.stores().await,
            targets,
        }))
    }

    /// Reconcile the heads of `doc` into one.
    ///
    /// Without explicit stores, every mounted store holding `doc` takes part,
    /// and an unreachable store fails the sync with `StoreUnavailable`.
    pub async fn sync(&self, doc: DocId, stores: Option<&[StoreId]>) -> Result<RevId> {
        let targets = match stores {
            Some(ids) => self.resolve_stores(ids).await?,
            None => self
                .entries(doc)
                .await?
                .into_iter()
                .map(|(store, _)| store)
                .collect(),
        };
        if targets.is_empty() {
            return Err(Error::not_found(format!("document {}", doc)));
        }

        match SyncEngine::new(&targets).sync(doc).await? {
            SyncOutcome::Resolved(head) => Ok(head),
            SyncOutcome::Conflict(heads) => Err(Error::Conflict(heads)),
        }
    }

    pub async fn stat(&self, rev: RevId) -> Result<RevisionStat> {
        let holders = self.holders(rev, true).await?;
        let revision = fetch_revision(&holders, rev).await?;
        Ok(RevisionStat {
            id: rev,
            revision,
            stores: holders.iter().map(|store| store.id().clone()).collect(),
        })
    }

    pub async fn lookup(&self, doc: DocId) -> Result<DocLookup> {
        let entries = self.reachable_entries(doc).await?;
        if entries.is_empty() {
            return Err(Error::not_found(format!("document {}", doc)));
        }
        Ok(DocLookup {
            doc,
            entries: entries
                .into_iter()
                .map(|(store, entry)| (store.id().clone(), entry))
                .collect(),
        })
    }

    /// Abandon a pre-revision. Heads and unknown ids are rejected.
    pub async fn forget(&self, doc: DocId, pre_revision: RevId) -> Result<()> {
        let batches: Vec<(Arc<Store>, Vec<RegistryOp>)> = self
            .entries(doc)
            .await?
            .into_iter()
            .filter(|(_, entry)| entry.pre_revision(pre_revision).is_some())
            .map(|(store, _)| (store, vec![RegistryOp::RemovePreRevision { id: pre_revision }]))
            .collect();
        if batches.is_empty() {
            return Err(Error::invalid_state(format!(
                "{} is not a pre-revision of document {}",
                pre_revision, doc
            )));
        }
        apply_everywhere(doc, &batches).await?;
        tracing::info!("Forgot pre-revision {} of document {}", pre_revision, doc);
        Ok(())
    }

    /// Open a revision for reading
    pub async fn peek(&self, rev: RevId) -> Result<RevisionReader> {
        let store = find_holder(&self.stores().await, rev).await?;
        let revision = store.revisions()?.get(rev).await?;
        Ok(RevisionReader {
            id: rev,
            store,
            revision,
        })
    }

    /// Drop `rev` from the heads and pre-revisions of `doc` on every store
    pub async fn delete_doc(&self, doc: DocId, rev: RevId) -> Result<()> {
        let batches: Vec<(Arc<Store>, Vec<RegistryOp>)> = self
            .entries(doc)
            .await?
            .into_iter()
            .filter(|(_, entry)| entry.is_head(rev) || entry.pre_revision(rev).is_some())
            .map(|(store, _)| (store, vec![RegistryOp::DropRevision { id: rev }]))
            .collect();
        if batches.is_empty() {
            return Err(Error::not_found(format!("revision {} in document {}", rev, doc)));
        }
        apply_everywhere(doc, &batches).await?;
        tracing::info!("Deleted revision {} from document {}", rev, doc);
        Ok(())
    }

    /// Remove a revision record from every store holding it
    pub async fn delete_rev(&self, rev: RevId) -> Result<()> {
        let holders = self.holders(rev, false).await?;
        if holders.is_empty() {
            return Err(Error::not_found(format!("revision {}", rev)));
        }
        for store in holders {
            store.revisions()?.remove(rev).await?;
        }
        tracing::info!("Deleted revision {}", rev);
        Ok(())
    }

    /// Every document known to a reachable store
    pub async fn documents(&self) -> Result<Vec<DocId>> {
        let mut docs = Vec::new();
        for store in self.stores().await {
            if !store.is_online() {
                continue;
            }
            docs.extend(store.registry()?.documents().await?);
        }
        docs.sort();
        docs.dedup();
        Ok(docs)
    }
}
