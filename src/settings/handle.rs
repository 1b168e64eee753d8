//! Hot-swappable settings handle.

use super::{ExportSettings, SettingsLoader, Validate};
use crate::error::{ExportError, Result};
use crate::target::{ExportTarget, FileTarget};
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Shared, lock-free access to the current [`ExportSettings`].
///
/// Readers take a snapshot with [`get`](Self::get); [`update`](Self::update)
/// and [`reload`](Self::reload) validate and atomically swap in new settings.
/// Moving the export to a different directory removes the previous export
/// directory so stale exports are not left behind.
///
/// # Examples
///
/// ```rust
/// use config_auto_export::settings::{ExportSettings, SettingsHandle};
///
/// let handle = SettingsHandle::new(ExportSettings::default());
/// let mut next = (*handle.get()).clone();
/// next.delay = 120;
/// handle.update(next)?;
/// assert_eq!(handle.get().delay, 120);
/// # Ok::<(), config_auto_export::error::ExportError>(())
/// ```
#[derive(Clone)]
pub struct SettingsHandle {
    current: Arc<ArcSwap<ExportSettings>>,
    loader: Option<Arc<SettingsLoader>>,
}

impl SettingsHandle {
    /// Wrap fixed settings without a loader.
    pub fn new(initial: ExportSettings) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(initial)),
            loader: None,
        }
    }

    pub(crate) fn with_loader(initial: ExportSettings, loader: SettingsLoader) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(initial)),
            loader: Some(Arc::new(loader)),
        }
    }

    /// Snapshot of the current settings.
    pub fn get(&self) -> Arc<ExportSettings> {
        self.current.load_full()
    }

    /// Reload from the sources the handle was built with.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle has no loader, loading fails, or the
    /// loaded settings are invalid. The current settings stay in place.
    pub fn reload(&self) -> Result<()> {
        let loader = self
            .loader
            .as_ref()
            .ok_or_else(|| ExportError::Other("No loader available for reload".to_string()))?;
        self.update(loader.load()?)
    }

    /// Replace the settings.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails or the previous export directory
    /// cannot be removed. The current settings stay in place.
    pub fn update(&self, new_settings: ExportSettings) -> Result<()> {
        new_settings.validate()?;

        let previous = self.current.load_full();
        if previous.directory != new_settings.directory
            && !previous.directory.as_os_str().is_empty()
        {
            tracing::info!(
                from = %previous.directory.display(),
                to = %new_settings.directory.display(),
                "Export directory changed, removing previous export"
            );
            FileTarget::new(&previous.directory).remove_all()?;
        }

        self.current.store(Arc::new(new_settings));
        tracing::debug!("Export settings updated");
        Ok(())
    }

    /// Files this handle reloads from.
    pub fn watched_paths(&self) -> Vec<std::path::PathBuf> {
        self.loader
            .as_ref()
            .map(|loader| loader.watched_paths())
            .unwrap_or_default()
    }

    /// Start reloading whenever one of the settings files changes.
    ///
    /// Events are debounced by `debounce`. Failed reloads are logged and keep
    /// the current settings. Watching stops when the returned guard is dropped.
    /// An optional file that does not exist yet is watched through its
    /// directory. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if there is nothing to watch or a file cannot be watched.
    #[cfg(feature = "file-watch")]
    pub async fn watch(&self, debounce: std::time::Duration) -> Result<super::SettingsWatch> {
        let paths = self.watched_paths();
        if paths.is_empty() {
            return Err(ExportError::WatchError(
                "Settings were not loaded from files".to_string(),
            ));
        }

        let (watcher, mut rx) = super::SettingsWatcher::new(debounce)?;
        for path in &paths {
            watcher.watch(path).await?;
        }

        let handle = self.clone();
        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                let handle = handle.clone();
                match tokio::task::spawn_blocking(move || handle.reload()).await {
                    Ok(Ok(())) => tracing::info!("Reloaded export settings"),
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "Settings reload failed, keeping previous settings")
                    }
                    Err(e) => tracing::warn!(error = %e, "Settings reload task failed"),
                }
            }
        });

        Ok(super::SettingsWatch::new(watcher, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn settings_in(directory: PathBuf) -> ExportSettings {
        ExportSettings {
            enabled: true,
            directory,
            ..Default::default()
        }
    }

    #[test]
    fn test_get_and_clone_share_state() {
        let handle = SettingsHandle::new(ExportSettings::default());
        let other = handle.clone();

        let mut next = ExportSettings::default();
        next.delay = 30;
        handle.update(next).unwrap();

        assert_eq!(other.get().delay, 30);
    }

    #[test]
    fn test_invalid_update_keeps_previous() {
        let handle = SettingsHandle::new(ExportSettings::default());
        let invalid = ExportSettings {
            enabled: true,
            ..Default::default()
        };

        assert!(matches!(
            handle.update(invalid),
            Err(ExportError::ValidationError(_))
        ));
        assert!(!handle.get().enabled);
    }

    #[test]
    fn test_directory_change_removes_previous_export() {
        let temp_dir = TempDir::new().unwrap();
        let old_dir = temp_dir.path().join("old");
        let new_dir = temp_dir.path().join("new");
        fs::create_dir_all(&old_dir).unwrap();
        fs::write(old_dir.join("system.site.yml"), "name: x").unwrap();

        let handle = SettingsHandle::new(settings_in(old_dir.clone()));
        handle.update(settings_in(new_dir.clone())).unwrap();

        assert!(!old_dir.exists());
        assert_eq!(handle.get().directory, new_dir);
    }

    #[test]
    fn test_same_directory_keeps_export() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("export");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("system.site.yml"), "name: x").unwrap();

        let handle = SettingsHandle::new(settings_in(dir.clone()));
        let mut next = settings_in(dir.clone());
        next.delay = 10;
        handle.update(next).unwrap();

        assert!(dir.join("system.site.yml").exists());
    }

    #[test]
    fn test_reload_without_loader() {
        let handle = SettingsHandle::new(ExportSettings::default());
        assert!(handle.reload().is_err());
        assert!(handle.watched_paths().is_empty());
    }

    #[cfg(feature = "file-watch")]
    #[tokio::test]
    async fn test_watch_with_missing_optional_file() {
        use crate::settings::SettingsBuilder;
        use std::time::Duration;

        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("export.yaml");
        let local = temp_dir.path().join("export.local.yaml");
        fs::write(&base, "delay: 60\n").unwrap();

        let handle = SettingsBuilder::new()
            .with_file(&base)
            .with_optional_file(&local)
            .build()
            .unwrap();
        let _watch = handle.watch(Duration::from_millis(50)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(&local, "delay: 15\n").unwrap();

        let mut reloaded = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if handle.get().delay == 15 {
                reloaded = true;
                break;
            }
        }
        assert!(reloaded, "creating the optional file did not reload settings");
    }
}
