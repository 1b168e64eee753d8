//! Exclusion rules derived from configuration splits.
//!
//! A split claims a set of configuration files (everything in its folder)
//! and a set of modules. Claimed keys are managed outside the export and
//! must never be mirrored; claimed modules are stripped from the exported
//! module list.

use crate::error::{ExportError, Result};
use crate::store::{ConfigData, ConfigReader};
use serde_yaml::Value;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use walkdir::WalkDir;

/// Key prefix of split definitions stored as configuration entities.
pub const SPLIT_KEY_PREFIX: &str = "config_split.config_split.";

/// Key of the aggregate module list.
pub const MODULE_LIST_KEY: &str = "core.extension";

const MODULE_LIST_FIELD: &str = "module";
const SPLIT_FILE_SUFFIX: &str = ".yml";

/// One split: a folder of claimed configuration files plus claimed modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitDefinition {
    /// Split identifier, for logging.
    pub id: String,
    /// Folder holding the split's configuration files.
    pub folder: PathBuf,
    /// Modules whose enabled status is managed by the split.
    pub modules: BTreeSet<String>,
}

impl SplitDefinition {
    /// Create a split without modules.
    pub fn new(id: impl Into<String>, folder: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            folder: folder.into(),
            modules: BTreeSet::new(),
        }
    }

    /// Add a claimed module.
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.modules.insert(module.into());
        self
    }
}

/// Optional capability enumerating the available splits.
pub trait SplitProvider: Send + Sync {
    /// Load every split definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the definitions cannot be enumerated. Callers treat
    /// this as "no splits".
    fn load_splits(&self) -> Result<Vec<SplitDefinition>>;
}

/// Provider returning a fixed list of splits.
#[derive(Debug, Clone, Default)]
pub struct StaticSplitProvider {
    splits: Vec<SplitDefinition>,
}

impl StaticSplitProvider {
    /// Wrap a fixed list of splits.
    pub fn new(splits: Vec<SplitDefinition>) -> Self {
        Self { splits }
    }
}

impl SplitProvider for StaticSplitProvider {
    fn load_splits(&self) -> Result<Vec<SplitDefinition>> {
        Ok(self.splits.clone())
    }
}

/// Provider reading split entities from the configuration store.
///
/// Every entry under [`SPLIT_KEY_PREFIX`] with a `folder` string is a split;
/// its `module` mapping (module name to weight) lists the claimed modules.
/// Entries without a folder are skipped with a warning.
/// Relative folders are resolved against the base directory when one is set.
pub struct ConfigSplitProvider {
    reader: Arc<dyn ConfigReader>,
    base_dir: Option<PathBuf>,
}

impl ConfigSplitProvider {
    /// Create a provider reading from `reader`.
    pub fn new(reader: Arc<dyn ConfigReader>) -> Self {
        Self {
            reader,
            base_dir: None,
        }
    }

    /// Resolve relative split folders against `base_dir`.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    fn parse(&self, key: &str, data: &ConfigData) -> Result<SplitDefinition> {
        let folder = data
            .get("folder")
            .and_then(Value::as_str)
            .ok_or_else(|| ExportError::Store(format!("Split '{key}' has no folder")))?;

        let mut folder = PathBuf::from(folder);
        if folder.is_relative() {
            if let Some(base) = &self.base_dir {
                folder = base.join(folder);
            }
        }

        let modules = match data.get(MODULE_LIST_FIELD) {
            Some(Value::Mapping(map)) => map
                .keys()
                .filter_map(|name| name.as_str().map(str::to_string))
                .collect(),
            _ => BTreeSet::new(),
        };

        Ok(SplitDefinition {
            id: key.trim_start_matches(SPLIT_KEY_PREFIX).to_string(),
            folder,
            modules,
        })
    }
}

impl SplitProvider for ConfigSplitProvider {
    fn load_splits(&self) -> Result<Vec<SplitDefinition>> {
        let mut splits = Vec::new();
        for key in self.reader.list_all(SPLIT_KEY_PREFIX)? {
            let Some(data) = self.reader.read(&key)? else {
                continue;
            };
            match self.parse(&key, &data) {
                Ok(split) => splits.push(split),
                Err(e) => tracing::warn!(split = %key, error = %e, "Ignoring malformed split"),
            }
        }
        Ok(splits)
    }
}

/// The resolved exclusion rule set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitRules {
    files: BTreeSet<String>,
    modules: BTreeSet<String>,
}

impl SplitRules {
    /// Resolve rules from split definitions by scanning their folders.
    ///
    /// Missing folders contribute nothing.
    pub fn from_splits(splits: &[SplitDefinition]) -> Self {
        let mut rules = Self::default();
        for split in splits {
            rules.modules.extend(split.modules.iter().cloned());

            if !split.folder.is_dir() {
                tracing::warn!(
                    split = %split.id,
                    folder = %split.folder.display(),
                    "Split folder does not exist"
                );
                continue;
            }

            for entry in WalkDir::new(&split.folder) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::warn!(split = %split.id, error = %e, "Skipping unreadable split entry");
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let file_name = entry.file_name().to_string_lossy();
                if file_name.ends_with(SPLIT_FILE_SUFFIX) {
                    rules.files.insert(file_name.into_owned());
                }
            }
        }
        rules
    }

    /// Whether `key` is claimed by a split.
    pub fn is_excluded(&self, key: &str) -> bool {
        self.files.contains(&format!("{key}{SPLIT_FILE_SUFFIX}"))
    }

    /// Modules claimed by any split.
    pub fn stripped_modules(&self) -> &BTreeSet<String> {
        &self.modules
    }

    /// Number of claimed configuration files.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Remove claimed modules from a module list snapshot.
    ///
    /// Returns how many entries were removed. Values without a `module`
    /// mapping are left untouched.
    pub fn strip_module_list(&self, data: &mut ConfigData) -> usize {
        if self.modules.is_empty() {
            return 0;
        }
        let Some(Value::Mapping(list)) = data.get_mut(MODULE_LIST_FIELD) else {
            return 0;
        };
        let before = list.len();
        list.retain(|name, _| match name.as_str() {
            Some(name) => !self.modules.contains(name),
            None => true,
        });
        before - list.len()
    }
}

/// Lazily resolved view over the optional split capability.
///
/// Rules are computed on first use and kept for the lifetime of the filter.
pub struct SplitFilter {
    provider: Option<Arc<dyn SplitProvider>>,
    rules: OnceLock<SplitRules>,
}

impl SplitFilter {
    /// Create a filter over an optional provider.
    pub fn new(provider: Option<Arc<dyn SplitProvider>>) -> Self {
        Self {
            provider,
            rules: OnceLock::new(),
        }
    }

    /// A filter that never excludes anything.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// The resolved rules, computing them on first call.
    pub fn rules(&self) -> &SplitRules {
        self.rules.get_or_init(|| {
            let Some(provider) = &self.provider else {
                return SplitRules::default();
            };
            match provider.load_splits() {
                Ok(splits) => {
                    let rules = SplitRules::from_splits(&splits);
                    tracing::debug!(
                        splits = splits.len(),
                        files = rules.file_count(),
                        modules = rules.stripped_modules().len(),
                        "Resolved split exclusion rules"
                    );
                    rules
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Split rules unavailable, exporting without exclusions");
                    SplitRules::default()
                }
            }
        })
    }

    /// Whether `key` is claimed by a split.
    pub fn is_excluded(&self, key: &str) -> bool {
        self.rules().is_excluded(key)
    }

    /// Modules claimed by any split.
    pub fn stripped_modules(&self) -> &BTreeSet<String> {
        self.rules().stripped_modules()
    }
}

impl Default for SplitFilter {
    fn default() -> Self {
        Self::disabled()
    }
}
