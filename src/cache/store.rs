//! Opaque key-value persistence for small configuration values.
//!
//! Values are grouped into named stores. A commit writes all of its entries
//! at once or none of them.

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use toml_edit::{DocumentMut, Item, Table};

/// Named-store key-value persistence.
pub trait KeyValueStore: Send + Sync {
    /// Look up several keys of `store` from one consistent snapshot.
    fn get_many(&self, store: &str, keys: &[&str]) -> Result<Vec<Option<String>>>;

    /// Look up `key` in `store`.
    fn get(&self, store: &str, key: &str) -> Result<Option<String>> {
        Ok(self.get_many(store, &[key])?.pop().flatten())
    }

    /// Write every entry into `store` in a single commit.
    fn commit(&self, store: &str, entries: &[(&str, &str)]) -> Result<()>;

    /// Drop a whole store.
    fn remove_store(&self, store: &str) -> Result<()>;
}

/// Key-value store backed by a TOML document, one table per store.
pub struct TomlFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TomlFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<DocumentMut> {
        if !self.path.exists() {
            return Ok(DocumentMut::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read store file: {:?}", self.path))?;
        content
            .parse()
            .with_context(|| format!("Failed to parse store file: {:?}", self.path))
    }

    /// Replace the file with `doc` via a temp file in the same directory, so
    /// readers see either the old document or the new one.
    fn write_document(&self, doc: &DocumentMut) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create store directory: {:?}", dir))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {:?}", dir))?;
        tmp.write_all(doc.to_string().as_bytes())
            .with_context(|| "Failed to write store contents")?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to replace store file: {:?}", self.path))?;
        Ok(())
    }
}

impl KeyValueStore for TomlFileStore {
    fn get_many(&self, store: &str, keys: &[&str]) -> Result<Vec<Option<String>>> {
        let doc = self.read_document()?;
        let table = doc.get(store);
        Ok(keys
            .iter()
            .map(|key| {
                table
                    .and_then(|t| t.get(key))
                    .and_then(|item| item.as_str())
                    .map(str::to_string)
            })
            .collect())
    }

    fn commit(&self, store: &str, entries: &[(&str, &str)]) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut doc = self.read_document()?;

        if !doc.contains_key(store) {
            doc.insert(store, Item::Table(Table::new()));
        }
        let table = doc[store]
            .as_table_mut()
            .with_context(|| format!("Store '{}' is not a table", store))?;
        for (key, value) in entries {
            table.insert(key, toml_edit::value(*value));
        }

        self.write_document(&doc)
    }

    fn remove_store(&self, store: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut doc = self.read_document()?;
        if doc.remove(store).is_some() {
            self.write_document(&doc)?;
        }
        Ok(())
    }
}

/// In-process store.
#[derive(Default)]
pub struct MemoryStore {
    stores: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_many(&self, store: &str, keys: &[&str]) -> Result<Vec<Option<String>>> {
        let stores = self.stores.read();
        let table = stores.get(store);
        Ok(keys
            .iter()
            .map(|key| table.and_then(|t| t.get(*key)).cloned())
            .collect())
    }

    fn commit(&self, store: &str, entries: &[(&str, &str)]) -> Result<()> {
        let mut stores = self.stores.write();
        let table = stores.entry(store.to_string()).or_default();
        for (key, value) in entries {
            table.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn remove_store(&self, store: &str) -> Result<()> {
        self.stores.write().remove(store);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlFileStore::new(dir.path().join("none.toml"));
        assert_eq!(store.get("a", "b").unwrap(), None);
    }

    #[test]
    fn test_file_store_commit_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlFileStore::new(dir.path().join("kv.toml"));
        store
            .commit("cam", &[("sps_pps", "AAA,BBB"), ("resolution", "640x480")])
            .unwrap();

        assert_eq!(store.get("cam", "sps_pps").unwrap().as_deref(), Some("AAA,BBB"));
        assert_eq!(store.get("cam", "resolution").unwrap().as_deref(), Some("640x480"));
        assert_eq!(store.get("other", "resolution").unwrap(), None);
    }

    #[test]
    fn test_file_store_get_many() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlFileStore::new(dir.path().join("kv.toml"));
        store.commit("cam", &[("a", "1"), ("b", "2")]).unwrap();

        let values = store.get_many("cam", &["b", "missing", "a"]).unwrap();
        assert_eq!(values, vec![Some("2".to_string()), None, Some("1".to_string())]);
        assert_eq!(store.get_many("other", &["a"]).unwrap(), vec![None]);
    }

    #[test]
    fn test_file_store_keeps_other_stores() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.toml");
        std::fs::write(&path, "# keep me\n[other]\nx = \"1\"\n").unwrap();

        let store = TomlFileStore::new(&path);
        store.commit("cam", &[("k", "v")]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("# keep me"));
        assert_eq!(store.get("other", "x").unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("cam", "k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_file_store_remove_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlFileStore::new(dir.path().join("kv.toml"));
        store.commit("cam", &[("k", "v")]).unwrap();
        store.remove_store("cam").unwrap();
        assert_eq!(store.get("cam", "k").unwrap(), None);
    }

    #[test]
    fn test_file_store_corrupt_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.toml");
        std::fs::write(&path, "[cam\n").unwrap();
        let store = TomlFileStore::new(&path);
        assert!(store.get("cam", "k").is_err());
        assert!(store.commit("cam", &[("k", "v")]).is_err());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        store.commit("cam", &[("a", "1"), ("b", "2")]).unwrap();
        assert_eq!(store.get("cam", "b").unwrap().as_deref(), Some("2"));
        store.remove_store("cam").unwrap();
        assert_eq!(store.get("cam", "a").unwrap(), None);
    }
}
