//! Sources the settings are merged from.

use crate::error::{ExportError, Result};
use config::{Environment, File};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Priority of the first settings file; later files count up in steps of 10.
pub const FILE_PRIORITY: i32 = 100;

/// Priority of environment overrides.
pub const ENV_PRIORITY: i32 = 300;

/// A layer of raw settings values.
///
/// Layers are merged lowest priority first, so higher priorities win.
pub trait SettingsSource: Send + Sync {
    /// Load the raw values of this layer.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer cannot be read or parsed.
    fn load(&self) -> Result<HashMap<String, config::Value>>;

    /// Human-readable name, for logging.
    fn name(&self) -> String;

    /// Merge priority (higher takes precedence).
    fn priority(&self) -> i32 {
        FILE_PRIORITY
    }

    /// File backing this layer, if any; watched for hot reload.
    fn path(&self) -> Option<&Path> {
        None
    }
}

/// Settings file in YAML, TOML or JSON, detected by extension.
///
/// # Examples
///
/// ```rust,no_run
/// use config_auto_export::settings::FileSource;
///
/// let defaults = FileSource::new("settings/export.yaml");
/// let local = FileSource::new("settings/export.local.yaml").optional();
/// ```
pub struct FileSource {
    path: PathBuf,
    priority: i32,
    required: bool,
}

impl FileSource {
    /// Create a required file source.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            priority: FILE_PRIORITY,
            required: true,
        }
    }

    /// Set the merge priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Treat a missing file as an empty layer.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    fn check_extension(&self) -> Result<()> {
        match self.path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml" | "toml" | "json") => Ok(()),
            Some(other) => Err(ExportError::LoadError(format!(
                "Unsupported settings file extension '.{}' (expected .yaml, .yml, .toml or .json)",
                other
            ))),
            None => Err(ExportError::LoadError(format!(
                "Unable to determine settings format for: {}",
                self.path.display()
            ))),
        }
    }
}

impl SettingsSource for FileSource {
    fn load(&self) -> Result<HashMap<String, config::Value>> {
        self.check_extension()?;

        if !self.path.exists() {
            if self.required {
                return Err(ExportError::LoadError(format!(
                    "Settings file not found: {}",
                    self.path.display()
                )));
            }
            return Ok(HashMap::new());
        }

        config::Config::builder()
            .add_source(File::from(self.path.clone()).required(true))
            .build()
            .map_err(|e| ExportError::LoadError(format!("Failed to read settings file: {}", e)))?
            .try_deserialize::<HashMap<String, config::Value>>()
            .map_err(|e| {
                ExportError::DeserializationError(format!("Failed to parse settings file: {}", e))
            })
    }

    fn name(&self) -> String {
        format!("file:{}", self.path.display())
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Environment overrides such as `CONFIG_EXPORT_DELAY=300`.
///
/// Values are parsed, so numbers and booleans keep their types.
pub struct EnvSource {
    prefix: String,
    separator: String,
    priority: i32,
}

impl EnvSource {
    /// Create an environment source for variables starting with `prefix`.
    pub fn new(prefix: impl Into<String>, separator: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            separator: separator.into(),
            priority: ENV_PRIORITY,
        }
    }

    /// Set the merge priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl SettingsSource for EnvSource {
    fn load(&self) -> Result<HashMap<String, config::Value>> {
        let environment = Environment::with_prefix(&self.prefix)
            .prefix_separator("_")
            .separator(&self.separator)
            .try_parsing(true);

        config::Config::builder()
            .add_source(environment)
            .build()
            .map_err(|e| ExportError::LoadError(format!("Failed to read environment: {}", e)))?
            .try_deserialize::<HashMap<String, config::Value>>()
            .map_err(|e| {
                ExportError::DeserializationError(format!("Failed to parse environment: {}", e))
            })
    }

    fn name(&self) -> String {
        format!("env:{}*", self.prefix)
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_extension_check() {
        assert!(FileSource::new("export.yaml").check_extension().is_ok());
        assert!(FileSource::new("export.yml").check_extension().is_ok());
        assert!(FileSource::new("export.toml").check_extension().is_ok());
        assert!(FileSource::new("export.json").check_extension().is_ok());
        assert!(FileSource::new("export.ini").check_extension().is_err());
        assert!(FileSource::new("export").check_extension().is_err());
    }

    #[test]
    fn test_load_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("export.yaml");
        fs::write(&path, "enabled: true\ndelay: 300\n").unwrap();

        let values = FileSource::new(&path).load().unwrap();
        assert!(values.contains_key("enabled"));
        assert!(values.contains_key("delay"));
    }

    #[test]
    fn test_missing_required_file() {
        let source = FileSource::new("/nonexistent/export.yaml");
        assert!(matches!(source.load(), Err(ExportError::LoadError(_))));
    }

    #[test]
    fn test_missing_optional_file() {
        let source = FileSource::new("/nonexistent/export.yaml").optional();
        assert!(source.load().unwrap().is_empty());
    }

    #[test]
    fn test_names_and_priorities() {
        let file = FileSource::new("export.yaml").with_priority(150);
        assert!(file.name().contains("export.yaml"));
        assert_eq!(file.priority(), 150);
        assert_eq!(file.path(), Some(Path::new("export.yaml")));

        let env = EnvSource::new("CONFIG_EXPORT", "__");
        assert_eq!(env.name(), "env:CONFIG_EXPORT*");
        assert_eq!(env.priority(), ENV_PRIORITY);
        assert!(env.path().is_none());
        assert_eq!(env.with_priority(400).priority(), 400);
    }
}
