//! JSON views printed by `hp stat` and `hp lookup`

use hp_core::{DocLookup, RevisionStat};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
pub struct StatView {
    pub rev: String,
    #[serde(rename = "type")]
    pub type_code: String,
    pub creator: String,
    pub mtime: String,
    pub parents: Vec<String>,
    pub parts: BTreeMap<String, u64>,
    pub stores: Vec<String>,
}

impl From<&RevisionStat> for StatView {
    fn from(stat: &RevisionStat) -> Self {
        Self {
            rev: stat.id().to_hex(),
            type_code: stat.type_code().to_string(),
            creator: stat.creator().to_string(),
            mtime: stat.mtime().to_rfc3339(),
            parents: stat.parents().iter().map(|id| id.to_hex()).collect(),
            parts: stat
                .sizes()
                .into_iter()
                .map(|(name, size)| (name.to_string(), size))
                .collect(),
            stores: stat.stores().iter().map(|id| id.to_string()).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LookupView {
    pub doc: String,
    pub revs: Vec<String>,
    pub pre_revs: Vec<String>,
    /// Head per store
    pub stores: BTreeMap<String, Option<String>>,
}

impl From<&DocLookup> for LookupView {
    fn from(lookup: &DocLookup) -> Self {
        Self {
            doc: lookup.doc().to_string(),
            revs: lookup.revs().iter().map(|id| id.to_hex()).collect(),
            pre_revs: lookup.pre_revs().iter().map(|id| id.to_hex()).collect(),
            stores: lookup
                .stores()
                .iter()
                .map(|store| (store.to_string(), lookup.rev(store).map(|id| id.to_hex())))
                .collect(),
        }
    }
}

pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
