//! YAML file export target.

use super::{ExportTarget, atomic_write};
use crate::error::{ExportError, Result};
use crate::store::ConfigData;
use std::fs;
use std::path::{Path, PathBuf};

/// Prefix of the locale sub-collections (`language.<locale>`).
pub const LANGUAGE_COLLECTION_PREFIX: &str = "language.";

const EXTENSION: &str = "yml";

/// Export target writing one `<key>.yml` file per configuration key.
///
/// Sub-collections live in sub-directories named after the collection,
/// e.g. `language.fr/system.site.yml`.
///
/// # Examples
///
/// ```rust,no_run
/// use config_auto_export::target::{ExportTarget, FileTarget};
///
/// let target = FileTarget::new("/var/exports/config");
/// let data = serde_yaml::from_str("name: Example").unwrap();
/// target.write("system.site", &data)?;
/// target.collection("language.fr").write("system.site", &data)?;
/// # Ok::<(), config_auto_export::error::ExportError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileTarget {
    root: PathBuf,
    collection: Option<String>,
}

impl FileTarget {
    /// Create a target rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            collection: None,
        }
    }

    /// Directory holding this target's files.
    pub fn directory(&self) -> PathBuf {
        match &self.collection {
            Some(collection) => self.root.join(collection),
            None => self.root.clone(),
        }
    }

    /// Root directory shared by all collections.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Name of this collection, `None` for the default one.
    pub fn collection_name(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    fn checked_directory(&self) -> Result<PathBuf> {
        if let Some(collection) = &self.collection {
            check_name("collection", collection)?;
        }
        Ok(self.directory())
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        check_name("configuration", key)?;
        Ok(self.checked_directory()?.join(format!("{key}.{EXTENSION}")))
    }
}

/// Names become single path components under the export root.
fn check_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
        return Err(ExportError::Other(format!(
            "Refusing to export invalid {kind} name '{name}'"
        )));
    }
    Ok(())
}

impl ExportTarget for FileTarget {
    fn write(&self, key: &str, data: &ConfigData) -> Result<()> {
        let path = self.path_for(key)?;
        let encoded = serde_yaml::to_string(data)?;
        atomic_write(&path, encoded.as_bytes())
    }

    fn read(&self, key: &str) -> Result<Option<ConfigData>> {
        let path = self.path_for(key)?;
        if !path.is_file() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        let data = serde_yaml::from_str(&raw).map_err(|e| {
            ExportError::DeserializationError(format!("{}: {}", path.display(), e))
        })?;
        Ok(Some(data))
    }

    fn remove_all(&self) -> Result<()> {
        let directory = self.checked_directory()?;
        if directory.is_dir() {
            fs::remove_dir_all(&directory)?;
        }
        Ok(())
    }

    fn collection(&self, name: &str) -> Box<dyn ExportTarget> {
        Box::new(Self {
            root: self.root.clone(),
            collection: Some(name.to_string()),
        })
    }
}
