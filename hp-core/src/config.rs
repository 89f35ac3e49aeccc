//! Connector configuration
//!
//! Stored as JSON (default file name `hotchpotch.json`). A missing file yields
//! the default configuration: no stores, coexisting pre-revisions.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::object::StoreId;

/// What a suspend does to existing pre-revisions based on the same parents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreRevisionPolicy {
    /// Every suspend adds a pre-revision
    #[default]
    Coexist,
    /// A suspend replaces pre-revisions with exactly the same parents
    ReplaceSameParent,
}

/// Storage backend of one store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreBackendConfig {
    Memory,
    Disk { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub id: StoreId,
    pub backend: StoreBackendConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Stores in the order they are mounted
    #[serde(default)]
    pub stores: Vec<StoreConfig>,
    #[serde(default)]
    pub pre_revision_policy: PreRevisionPolicy,
    /// Decoded revision records kept in memory per disk store
    #[serde(default = "default_revision_cache_capacity")]
    pub revision_cache_capacity: usize,
}

fn default_revision_cache_capacity() -> usize {
    1024
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            stores: Vec::new(),
            pre_revision_policy: PreRevisionPolicy::default(),
            revision_cache_capacity: default_revision_cache_capacity(),
        }
    }
}

impl ConnectorConfig {
    /// Load config from a JSON file, or defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Save config atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp_path = path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self)?;
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    pub fn store(&self, id: &StoreId) -> Option<&StoreConfig> {
        self.stores.iter().find(|store| &store.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = ConnectorConfig::load(&tmp.path().join("absent.json")).unwrap();
        assert_eq!(config, ConnectorConfig::default());
        assert_eq!(config.revision_cache_capacity, 1024);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("conf").join("hotchpotch.json");
        let config = ConnectorConfig {
            stores: vec![
                StoreConfig {
                    id: StoreId::new("rem1"),
                    backend: StoreBackendConfig::Disk { path: tmp.path().join("rem1") },
                },
                StoreConfig {
                    id: StoreId::new("scratch"),
                    backend: StoreBackendConfig::Memory,
                },
            ],
            pre_revision_policy: PreRevisionPolicy::ReplaceSameParent,
            revision_cache_capacity: 8,
        };
        config.save(&path).unwrap();
        assert_eq!(ConnectorConfig::load(&path).unwrap(), config);
        assert!(config.store(&StoreId::new("scratch")).is_some());
    }

    #[test]
    fn test_parse_minimal_json() {
        let json = r#"{
            "stores": [{ "id": "rem1", "backend": { "kind": "disk", "path": "/var/hp/rem1" } }],
            "pre_revision_policy": "replace_same_parent"
        }"#;
        let config: ConnectorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.stores[0].id.as_str(), "rem1");
        assert_eq!(config.pre_revision_policy, PreRevisionPolicy::ReplaceSameParent);
        assert_eq!(config.revision_cache_capacity, 1024);
    }
}
