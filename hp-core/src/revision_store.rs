//! Revision store
//!
//! Immutable, content-addressed revision records and their named part blobs,
//! local to one replica. Records are never mutated once persisted.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::object::{RevId, Revision};
use crate::storage::ObjectStore;

pub struct RevisionStore {
    objects: Arc<dyn ObjectStore>,
}

impl RevisionStore {
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self { objects }
    }

    /// Persist a revision and every part blob it references.
    ///
    /// `contents` must hold the bytes of each part that is not already stored
    /// here. Blobs are shared between revisions by content hash.
    pub async fn put(&self, revision: &Revision, contents: &BTreeMap<String, Bytes>) -> Result<RevId> {
        for (name, part) in &revision.parts {
            if self.objects.has_part(part.id).await? {
                continue;
            }
            let data = contents.get(name).ok_or_else(|| {
                Error::invalid_state(format!("No content supplied for part '{}'", name))
            })?;
            let stored = self.objects.put_part(data.clone()).await?;
            if stored != part.id {
                return Err(Error::invalid_state(format!(
                    "Content of part '{}' hashes to {}, expected {}",
                    name, stored, part.id
                )));
            }
        }

        let id = revision.id();
        self.objects.put_revision(id, revision).await?;
        Ok(id)
    }

    pub async fn get(&self, id: RevId) -> Result<Revision> {
        self.objects.get_revision(id).await
    }

    pub async fn contains(&self, id: RevId) -> Result<bool> {
        self.objects.has_revision(id).await
    }

    /// Part names of a revision
    pub async fn parts(&self, id: RevId) -> Result<Vec<String>> {
        Ok(self.get(id).await?.part_names())
    }

    /// Read one part of a revision
    pub async fn read(&self, id: RevId, part: &str) -> Result<Bytes> {
        let revision = self.get(id).await?;
        let part_ref = revision
            .parts
            .get(part)
            .ok_or_else(|| Error::not_found(format!("part '{}' of revision {}", part, id)))?;
        self.objects.get_part(part_ref.id).await
    }

    /// Read every part of a revision
    pub async fn read_all(&self, id: RevId) -> Result<BTreeMap<String, Bytes>> {
        let revision = self.get(id).await?;
        let mut contents = BTreeMap::new();
        for (name, part) in &revision.parts {
            contents.insert(name.clone(), self.objects.get_part(part.id).await?);
        }
        Ok(contents)
    }

    /// Remove a revision record. Part blobs are left in place.
    pub async fn remove(&self, id: RevId) -> Result<bool> {
        self.objects.delete_revision(id).await
    }

    pub async fn list(&self) -> Result<Vec<RevId>> {
        self.objects.list_revisions().await
    }
}
