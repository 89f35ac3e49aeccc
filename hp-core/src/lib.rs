//! Hotchpotch Core Library
//!
//! Core functionality for a distributed, version-controlled document store:
//! - Object model (content-addressed revisions, document and store ids)
//! - Object storage (in-memory and sled-backed, zstd-compressed parts)
//! - Per-store document registry (heads and pre-revisions)
//! - Writer transactions (create/fork/update/resume, commit/suspend/abort)
//! - Revision graph and sync engine (fast-forward or conflict)
//! - Connector facade over every mounted store

pub mod config;
pub mod connector;
pub mod error;
pub mod graph;
pub mod object;
pub mod registry;
pub mod replication;
pub mod revision_store;
pub mod storage;
pub mod store;
pub mod sync;
pub mod writer;

pub use config::{ConnectorConfig, PreRevisionPolicy, StoreBackendConfig, StoreConfig};
pub use connector::{Connector, DocLookup, RevisionReader, RevisionStat};
pub use error::{Error, Result};
pub use graph::{reconcile, RevisionGraph, SyncOutcome};
pub use object::{DocId, ObjectId, PartRef, RevId, Revision, StoreId};
pub use registry::{
    DiskRegistry, DocEntry, DocumentRegistry, MemoryRegistry, PreRevision, RegistryChange, RegistryOp,
};
pub use revision_store::RevisionStore;
pub use storage::{DiskObjectStore, MemoryObjectStore, ObjectStore};
pub use store::{apply_everywhere, Store};
pub use sync::{ObservedHeads, SyncEngine};
pub use writer::{Writer, WriterMode};
