//! Revision replication between stores
//!
//! Copies a revision together with every ancestor the destination is missing.
//! Ancestors are written before descendants, so an interrupted copy never
//! leaves a revision on the destination without its history.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::object::{RevId, Revision};
use crate::store::Store;

/// First online store in `sources` that holds `id`
pub async fn find_holder(sources: &[Arc<Store>], id: RevId) -> Result<Arc<Store>> {
    for store in sources {
        let Ok(revisions) = store.revisions() else {
            continue;
        };
        if revisions.contains(id).await? {
            return Ok(store.clone());
        }
    }
    Err(Error::not_found(format!("revision {} on any reachable store", id)))
}

/// Fetch a revision record from the first source that holds it
pub async fn fetch_revision(sources: &[Arc<Store>], id: RevId) -> Result<Revision> {
    find_holder(sources, id).await?.revisions()?.get(id).await
}

/// Copy `id` and its missing ancestry from `sources` into `dest`.
///
/// Returns the number of revisions copied.
pub async fn copy_closure(id: RevId, sources: &[Arc<Store>], dest: &Store) -> Result<usize> {
    let target = dest.revisions()?;

    // collect missing revisions, descendants first
    let mut missing: Vec<(RevId, Arc<Store>, Revision)> = Vec::new();
    let mut seen = HashSet::new();
    let mut stack = vec![id];
    while let Some(next) = stack.pop() {
        if !seen.insert(next) || target.contains(next).await? {
            continue;
        }
        let holder = find_holder(sources, next).await?;
        let revision = holder.revisions()?.get(next).await?;
        stack.extend(revision.parents.iter().copied());
        missing.push((next, holder, revision));
    }

    // a revision is pushed before its parents, so reversing writes ancestors first
    let copied = missing.len();
    for (rev_id, holder, revision) in missing.into_iter().rev() {
        let contents = holder.revisions()?.read_all(rev_id).await?;
        target.put(&revision, &contents).await?;
        tracing::debug!("Copied revision {} from {} to {}", rev_id, holder.id(), dest.id());
    }

    if copied > 0 {
        tracing::info!("Replicated {} revision(s) of {} to store {}", copied, id, dest.id());
    }
    Ok(copied)
}
