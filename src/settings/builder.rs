//! Builder for constructing [`SettingsHandle`] instances.

use super::{
    EnvSource, FILE_PRIORITY, FileSource, SettingsHandle, SettingsLoader, SettingsSource, Validate,
};
use crate::error::Result;
use std::path::PathBuf;

/// Fluent construction of a settings handle from files and environment.
///
/// # Examples
///
/// ```rust,no_run
/// use config_auto_export::settings::SettingsBuilder;
///
/// # fn example() -> config_auto_export::error::Result<()> {
/// let settings = SettingsBuilder::new()
///     .with_file("settings/export.yaml")
///     .with_optional_file("settings/export.local.yaml")
///     .with_env_overrides("CONFIG_EXPORT", "__")
///     .build()?;
/// println!("Exporting to {}", settings.get().directory.display());
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct SettingsBuilder {
    files: Vec<(PathBuf, bool)>,
    env: Option<(String, String)>,
    custom_sources: Vec<Box<dyn SettingsSource>>,
}

impl SettingsBuilder {
    /// Create a builder with no sources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required settings file. Later files override earlier ones.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push((path.into(), true));
        self
    }

    /// Add a settings file that may be absent.
    pub fn with_optional_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push((path.into(), false));
        self
    }

    /// Add environment overrides, e.g. `CONFIG_EXPORT_DELAY=300`.
    pub fn with_env_overrides(mut self, prefix: &str, separator: &str) -> Self {
        self.env = Some((prefix.to_string(), separator.to_string()));
        self
    }

    /// Add a custom source.
    pub fn with_source<S: SettingsSource + 'static>(mut self, source: S) -> Self {
        self.custom_sources.push(Box::new(source));
        self
    }

    /// Load, validate and wrap the settings.
    ///
    /// Without any source the handle starts from the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a source fails to load or the merged settings are
    /// invalid.
    pub fn build(self) -> Result<SettingsHandle> {
        let mut loader = SettingsLoader::new();

        for (index, (path, required)) in self.files.into_iter().enumerate() {
            let mut source = FileSource::new(path).with_priority(FILE_PRIORITY + index as i32 * 10);
            if !required {
                source = source.optional();
            }
            loader.add_source(Box::new(source));
        }

        for source in self.custom_sources {
            loader.add_source(source);
        }

        if let Some((prefix, separator)) = self.env {
            loader.add_source(Box::new(EnvSource::new(prefix, separator)));
        }

        if loader.is_empty() {
            return Ok(SettingsHandle::new(Default::default()));
        }

        let settings = loader.load()?;
        settings.validate()?;
        tracing::debug!(sources = ?loader.source_names(), "Loaded export settings");

        Ok(SettingsHandle::with_loader(settings, loader))
    }
}
