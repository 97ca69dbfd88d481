//! Snapshot storage
//!
//! The snapshot is rewritten after every state change, so writes go to a
//! temporary file first and are renamed over the old snapshot.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AfcError, Result};
use crate::hal::StateStore;

/// Stores the snapshot as pretty-printed JSON on disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<Option<serde_json::Value>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path).map_err(|e| AfcError::FileRead {
            path: self.path.clone(),
            source: e,
        })?;
        if content.trim().is_empty() {
            return Ok(None);
        }

        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&mut self, value: &serde_json::Value) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| AfcError::FileWrite {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        let content = serde_json::to_string_pretty(value)?;
        let temp = self.temp_path();
        fs::write(&temp, content).map_err(|e| AfcError::FileWrite {
            path: temp.clone(),
            source: e,
        })?;
        fs::rename(&temp, &self.path).map_err(|e| AfcError::FileWrite {
            path: self.path.clone(),
            source: e,
        })?;

        Ok(())
    }
}

/// Keeps the snapshot in memory. Used by tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    value: Option<serde_json::Value>,
    saves: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: serde_json::Value) -> Self {
        Self {
            value: Some(value),
            saves: 0,
        }
    }

    /// Number of saves performed.
    pub fn saves(&self) -> usize {
        self.saves
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<Option<serde_json::Value>> {
        Ok(self.value.clone())
    }

    fn save(&mut self, value: &serde_json::Value) -> Result<()> {
        self.value = Some(value.clone());
        self.saves += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_loads_none() {
        let temp = tempdir().unwrap();
        let store = JsonFileStore::new(&temp.path().join("AFC.vars.unit"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_creates_parent_and_reloads() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("vars").join("AFC.vars.unit");
        let mut store = JsonFileStore::new(&path);

        store.save(&json!({"system": {"current_load": "lane1"}})).unwrap();

        assert!(path.exists());
        assert!(!store.temp_path().exists());
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded["system"]["current_load"], "lane1");
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("AFC.vars.unit");
        fs::write(&path, "{not json").unwrap();
        let store = JsonFileStore::new(&path);
        let err = store.load().unwrap_err();
        assert_eq!(err.error_code(), "SERIALIZATION_ERROR");
    }

    #[test]
    fn test_memory_store_counts_saves() {
        let mut store = MemoryStore::new();
        store.save(&json!({})).unwrap();
        store.save(&json!({"a": 1})).unwrap();
        assert_eq!(store.saves(), 2);
        assert_eq!(store.load().unwrap().unwrap()["a"], 1);
    }
}
