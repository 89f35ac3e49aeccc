//! Revision ancestry graph
//!
//! An arena of revision nodes keyed by revision id. Parent links are arena
//! indices, so ancestry queries are plain index walks. The graph only ever
//! holds what the sync engine loaded; a node whose parents were never loaded
//! simply has none.

use std::collections::{HashMap, VecDeque};

use crate::object::RevId;

#[derive(Debug)]
struct Node {
    id: RevId,
    parents: Vec<usize>,
    loaded: bool,
}

#[derive(Debug, Default)]
pub struct RevisionGraph {
    nodes: Vec<Node>,
    index: HashMap<RevId, usize>,
}

impl RevisionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn intern(&mut self, id: RevId) -> usize {
        if let Some(&idx) = self.index.get(&id) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(Node {
            id,
            parents: Vec::new(),
            loaded: false,
        });
        self.index.insert(id, idx);
        idx
    }

    /// Record a revision and its parent links
    pub fn insert(&mut self, id: RevId, parents: &[RevId]) {
        let parent_idx: Vec<usize> = parents.iter().map(|p| self.intern(*p)).collect();
        let idx = self.intern(id);
        let node = &mut self.nodes[idx];
        node.parents = parent_idx;
        node.loaded = true;
    }

    pub fn contains(&self, id: RevId) -> bool {
        self.index.contains_key(&id)
    }

    /// Whether the parents of `id` have been recorded
    pub fn is_loaded(&self, id: RevId) -> bool {
        self.index
            .get(&id)
            .map(|&idx| self.nodes[idx].loaded)
            .unwrap_or(false)
    }

    pub fn parents(&self, id: RevId) -> Vec<RevId> {
        match self.index.get(&id) {
            Some(&idx) => self.nodes[idx]
                .parents
                .iter()
                .map(|&p| self.nodes[p].id)
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `ancestor` is reachable from `descendant` via parent links.
    /// A revision is not its own ancestor.
    pub fn is_ancestor(&self, ancestor: RevId, descendant: RevId) -> bool {
        let (Some(&target), Some(&start)) = (self.index.get(&ancestor), self.index.get(&descendant)) else {
            return false;
        };

        let mut visited = vec![false; self.nodes.len()];
        let mut queue: VecDeque<usize> = self.nodes[start].parents.iter().copied().collect();
        while let Some(idx) = queue.pop_front() {
            if idx == target {
                return true;
            }
            if visited[idx] {
                continue;
            }
            visited[idx] = true;
            queue.extend(self.nodes[idx].parents.iter().copied());
        }
        false
    }
}

/// Result of reconciling a document's candidate heads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// One revision subsumes every candidate
    Resolved(RevId),
    /// Candidates with no ancestry relation between them
    Conflict(Vec<RevId>),
}

/// Collapse candidate heads by ancestry.
///
/// Every candidate that is an ancestor of another candidate is dropped
/// (fast-forward). Exactly one survivor resolves; more than one is a conflict.
pub fn reconcile(graph: &RevisionGraph, candidates: &[RevId]) -> SyncOutcome {
    let mut unique: Vec<RevId> = Vec::with_capacity(candidates.len());
    for id in candidates {
        if !unique.contains(id) {
            unique.push(*id);
        }
    }

    let survivors: Vec<RevId> = unique
        .iter()
        .copied()
        .filter(|a| !unique.iter().any(|b| a != b && graph.is_ancestor(*a, *b)))
        .collect();

    match survivors.as_slice() {
        [only] => SyncOutcome::Resolved(*only),
        _ => SyncOutcome::Conflict(survivors),
    }
}
