//! Read access to the host configuration store.

use super::ConfigData;
use crate::error::{ExportError, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use walkdir::WalkDir;

/// Read-only view of the canonical configuration store.
///
/// Capture always re-reads the saved entry through this trait so the export
/// reflects the post-save state rather than a change payload.
pub trait ConfigReader: Send + Sync {
    /// Read the full value stored under `key`, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the value cannot be decoded.
    fn read(&self, key: &str) -> Result<Option<ConfigData>>;

    /// List all keys starting with `prefix`, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be enumerated.
    fn list_all(&self, prefix: &str) -> Result<Vec<String>>;
}

/// In-memory configuration store.
///
/// # Examples
///
/// ```rust
/// use config_auto_export::store::{ConfigReader, MemoryConfigStore};
///
/// let store = MemoryConfigStore::new();
/// store.set("system.site", serde_yaml::from_str("name: Example").unwrap());
/// assert!(store.read("system.site").unwrap().is_some());
/// ```
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    entries: RwLock<BTreeMap<String, ConfigData>>,
}

impl MemoryConfigStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the value under `key`.
    pub fn set(&self, key: impl Into<String>, data: ConfigData) {
        self.entries.write().insert(key.into(), data);
    }

    /// Remove `key` from the store.
    pub fn remove(&self, key: &str) -> Option<ConfigData> {
        self.entries.write().remove(key)
    }
}

impl ConfigReader for MemoryConfigStore {
    fn read(&self, key: &str) -> Result<Option<ConfigData>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn list_all(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Configuration store backed by a directory of `<key>.yml` files.
pub struct FileConfigStore {
    directory: PathBuf,
}

impl FileConfigStore {
    /// Create a store reading from `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{key}.yml"))
    }
}

impl ConfigReader for FileConfigStore {
    fn read(&self, key: &str) -> Result<Option<ConfigData>> {
        let path = self.path_for(key);
        if !path.is_file() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        let data = serde_yaml::from_str(&raw).map_err(|e| {
            ExportError::DeserializationError(format!("{}: {}", path.display(), e))
        })?;
        Ok(Some(data))
    }

    fn list_all(&self, prefix: &str) -> Result<Vec<String>> {
        if !self.directory.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&self.directory).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| ExportError::Store(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy();
            if let Some(key) = file_name.strip_suffix(".yml") {
                if key.starts_with(prefix) {
                    keys.push(key.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn yaml(raw: &str) -> ConfigData {
        serde_yaml::from_str(raw).unwrap()
    }

    #[test]
    fn test_memory_store_read_and_list() {
        let store = MemoryConfigStore::new();
        store.set("system.site", yaml("name: Example"));
        store.set("system.mail", yaml("interface: php"));
        store.set("views.view.content", yaml("id: content"));

        assert_eq!(
            store.read("system.site").unwrap(),
            Some(yaml("name: Example"))
        );
        assert_eq!(store.read("missing").unwrap(), None);
        assert_eq!(
            store.list_all("system.").unwrap(),
            vec!["system.mail".to_string(), "system.site".to_string()]
        );

        store.remove("system.mail");
        assert_eq!(store.list_all("system.").unwrap().len(), 1);
    }

    #[test]
    fn test_file_store_read() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("system.site.yml"), "name: Example\n").unwrap();

        let store = FileConfigStore::new(temp_dir.path());
        assert_eq!(
            store.read("system.site").unwrap(),
            Some(yaml("name: Example"))
        );
        assert_eq!(store.read("system.mail").unwrap(), None);
    }

    #[test]
    fn test_file_store_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("broken.yml"), "a: [unclosed").unwrap();

        let store = FileConfigStore::new(temp_dir.path());
        assert!(matches!(
            store.read("broken"),
            Err(ExportError::DeserializationError(_))
        ));
    }

    #[test]
    fn test_file_store_list_all() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("b.split.yml"), "folder: x").unwrap();
        fs::write(temp_dir.path().join("a.split.yml"), "folder: y").unwrap();
        fs::write(temp_dir.path().join("other.yml"), "x: 1").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "ignored").unwrap();

        let store = FileConfigStore::new(temp_dir.path());
        assert_eq!(store.list_all("").unwrap().len(), 3);
        assert_eq!(
            store.list_all("a.").unwrap(),
            vec!["a.split".to_string()]
        );

        let missing = FileConfigStore::new(temp_dir.path().join("nope"));
        assert!(missing.list_all("").unwrap().is_empty());
    }
}
