//! Merges settings layers into a typed [`ExportSettings`].

use super::{ExportSettings, SettingsSource};
use crate::error::{ExportError, Result};
use std::path::PathBuf;

/// Loads and merges settings from multiple sources.
///
/// Sources are merged in priority order (lowest first) on top of the
/// defaults, so a source only needs to mention the fields it changes.
#[derive(Default)]
pub struct SettingsLoader {
    sources: Vec<Box<dyn SettingsSource>>,
}

impl SettingsLoader {
    /// Create an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a settings source.
    pub fn add_source(&mut self, source: Box<dyn SettingsSource>) {
        self.sources.push(source);
    }

    /// Whether any source was added.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Load and merge all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if no source was added, a source fails to load, or
    /// the merged values do not deserialize into [`ExportSettings`].
    pub fn load(&self) -> Result<ExportSettings> {
        if self.sources.is_empty() {
            return Err(ExportError::LoadError(
                "No settings sources specified".to_string(),
            ));
        }

        let mut builder = config::Config::builder();
        for source in self.sorted() {
            let values = source.load().map_err(|e| {
                ExportError::LoadError(format!("Failed to load source '{}': {}", source.name(), e))
            })?;

            for (key, value) in values {
                builder = builder.set_override(&key, value).map_err(|e| {
                    ExportError::LoadError(format!(
                        "Failed to merge source '{}': {}",
                        source.name(),
                        e
                    ))
                })?;
            }
        }

        builder
            .build()
            .map_err(|e| ExportError::LoadError(format!("Failed to build settings: {}", e)))?
            .try_deserialize::<ExportSettings>()
            .map_err(|e| {
                ExportError::DeserializationError(format!("Failed to deserialize settings: {}", e))
            })
    }

    /// Source names in merge order.
    pub fn source_names(&self) -> Vec<String> {
        self.sorted().iter().map(|s| s.name()).collect()
    }

    /// Files backing the sources, in merge order.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.sorted()
            .iter()
            .filter_map(|s| s.path().map(PathBuf::from))
            .collect()
    }

    fn sorted(&self) -> Vec<&dyn SettingsSource> {
        let mut sorted: Vec<&dyn SettingsSource> =
            self.sources.iter().map(|s| s.as_ref()).collect();
        sorted.sort_by_key(|s| s.priority());
        sorted
    }
}
