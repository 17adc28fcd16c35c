// src/catalog/store.rs

//! Durable backing stores for the recipe catalog
//!
//! The catalog hands the store a full snapshot after every mutation.
//! `JsonFileStore` writes `catalog.json` through a temporary file in the same
//! directory followed by a rename, so a crash leaves either the old or the
//! new file, never a torn one.

use crate::error::{Error, Result};
use crate::recipe::Recipe;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// name -> version -> recipe
pub type CatalogSnapshot = BTreeMap<String, BTreeMap<String, Recipe>>;

/// File name used inside the storage directory
pub const CATALOG_FILE: &str = "catalog.json";

/// Persistence backend for the catalog
pub trait CatalogStore: Send + Sync {
    /// Load every stored recipe
    fn load(&self) -> Result<CatalogSnapshot>;

    /// Replace the stored catalog with `snapshot`
    fn save(&self, snapshot: &CatalogSnapshot) -> Result<()>;
}

/// Catalog persisted as one JSON document on disk
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Store `catalog.json` inside `storage_dir`
    pub fn new(storage_dir: &Path) -> Self {
        Self {
            path: storage_dir.join(CATALOG_FILE),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CatalogStore for JsonFileStore {
    fn load(&self) -> Result<CatalogSnapshot> {
        let mut snapshot = CatalogSnapshot::new();

        if !self.path.exists() {
            debug!("No catalog at {}, starting empty", self.path.display());
            return Ok(snapshot);
        }

        let content = fs::read_to_string(&self.path).map_err(|e| {
            Error::IoError(format!("Failed to read catalog {}: {e}", self.path.display()))
        })?;
        let data: Map<String, Value> = serde_json::from_str(&content).map_err(|e| {
            Error::ParseError(format!("Invalid catalog {}: {e}", self.path.display()))
        })?;

        for (name, versions) in data {
            let Value::Object(versions) = versions else {
                warn!("Skipping catalog entry {}: not an object", name);
                continue;
            };

            for (version, doc) in versions {
                match Recipe::from_document(doc) {
                    Ok(recipe) => {
                        snapshot
                            .entry(name.clone())
                            .or_default()
                            .insert(version, recipe);
                    }
                    Err(e) => warn!("Skipping {}:{} while loading catalog: {}", name, version, e),
                }
            }
        }

        debug!("Loaded {} recipe names from {}", snapshot.len(), self.path.display());
        Ok(snapshot)
    }

    fn save(&self, snapshot: &CatalogSnapshot) -> Result<()> {
        let dir = self.path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(dir).map_err(|e| {
            Error::IoError(format!("Failed to create storage directory {}: {e}", dir.display()))
        })?;

        let mut data = Map::new();
        for (name, versions) in snapshot {
            let mut docs = Map::new();
            for (version, recipe) in versions {
                docs.insert(version.clone(), recipe.to_document()?);
            }
            data.insert(name.clone(), Value::Object(docs));
        }
        let content = serde_json::to_vec_pretty(&Value::Object(data))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| {
            Error::IoError(format!("Failed to replace {}: {}", self.path.display(), e.error))
        })?;

        Ok(())
    }
}

/// In-memory store, for tests and ephemeral catalogs
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<CatalogSnapshot>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times the catalog has been saved
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }

    /// Copy of the last saved snapshot
    pub fn snapshot(&self) -> CatalogSnapshot {
        self.data.lock().clone()
    }
}

impl CatalogStore for MemoryStore {
    fn load(&self) -> Result<CatalogSnapshot> {
        Ok(self.data.lock().clone())
    }

    fn save(&self, snapshot: &CatalogSnapshot) -> Result<()> {
        *self.data.lock() = snapshot.clone();
        *self.saves.lock() += 1;
        Ok(())
    }
}

impl<T: CatalogStore + ?Sized> CatalogStore for std::sync::Arc<T> {
    fn load(&self) -> Result<CatalogSnapshot> {
        (**self).load()
    }

    fn save(&self, snapshot: &CatalogSnapshot) -> Result<()> {
        (**self).save(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_loads_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(&temp_dir.path().join("nested"));

        let mut recipe = Recipe::new("redis", "7.2.0", "debvisor", "Key-value store");
        recipe.signatures.insert("key".to_string(), "c2ln".to_string());
        let digest = recipe.compute_digest();

        let mut snapshot = CatalogSnapshot::new();
        snapshot
            .entry("redis".to_string())
            .or_default()
            .insert("7.2.0".to_string(), recipe);
        store.save(&snapshot).unwrap();

        let loaded = store.load().unwrap();
        let loaded = &loaded["redis"]["7.2.0"];
        assert_eq!(loaded.compute_digest(), digest);
        assert_eq!(loaded.checksum.as_deref(), Some(digest.as_str()));
        assert_eq!(loaded.signatures["key"], "c2ln");
    }

    #[test]
    fn test_corrupt_entry_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path());
        fs::write(
            store.path(),
            r#"{"good": {"1.0": {"name": "good", "version": "1.0", "publisher": "p"}},
                "bad": {"1.0": {"version": "1.0"}}}"#,
        )
        .unwrap();

        let loaded = store.load().unwrap();
        assert!(loaded.contains_key("good"));
        assert!(!loaded.contains_key("bad"));
    }
}
