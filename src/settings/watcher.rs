//! File watching for settings hot reload.

use crate::error::{ExportError, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};

/// Watches settings files and emits a debounced reload signal.
///
/// Bursts of events within the debounce window collapse into one trailing
/// signal. A file that does not exist yet is watched through its parent
/// directory, so creating it later also triggers a reload.
pub struct SettingsWatcher {
    watcher: Mutex<RecommendedWatcher>,
    debounce: Duration,
    targets: Arc<RwLock<Vec<PathBuf>>>,
}

impl SettingsWatcher {
    /// Create a watcher and the receiver of its reload signals.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform watcher cannot be created.
    pub fn new(debounce: Duration) -> Result<(Self, mpsc::Receiver<()>)> {
        let (tx, rx) = mpsc::channel(16);
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();
        let targets: Arc<RwLock<Vec<PathBuf>>> = Arc::default();

        let filter = Arc::clone(&targets);
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let relevant = matches!(
                    event.kind,
                    EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                );
                let targets = filter.read();
                if relevant && event.paths.iter().any(|path| targets.contains(path)) {
                    let _ = event_tx.send(event);
                }
            }
        })
        .map_err(|e| ExportError::WatchError(format!("Failed to create file watcher: {}", e)))?;

        tokio::spawn(async move {
            let mut pending_until: Option<Instant> = None;
            loop {
                let event = match pending_until {
                    Some(deadline) => {
                        tokio::select! {
                            event = event_rx.recv() => event,
                            _ = sleep(deadline.saturating_duration_since(Instant::now())) => {
                                pending_until = None;
                                if tx.send(()).await.is_err() {
                                    break;
                                }
                                continue;
                            }
                        }
                    }
                    None => event_rx.recv().await,
                };

                match event {
                    Some(_) => pending_until = Some(Instant::now() + debounce),
                    None => break,
                }
            }
        });

        Ok((
            Self {
                watcher: Mutex::new(watcher),
                debounce,
                targets,
            },
            rx,
        ))
    }

    /// Start watching `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if neither the path nor its parent directory exists,
    /// or the platform watcher refuses it.
    pub async fn watch(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let resolve_error = |e: std::io::Error| {
            ExportError::WatchError(format!("Failed to resolve {}: {}", path.display(), e))
        };

        let (watch_root, target) = if path.exists() {
            let canonical = path.canonicalize().map_err(resolve_error)?;
            (canonical.clone(), canonical)
        } else {
            let file_name = path.file_name().ok_or_else(|| {
                ExportError::WatchError(format!("Not a file path: {}", path.display()))
            })?;
            let parent = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            let parent = parent.canonicalize().map_err(resolve_error)?;
            tracing::debug!(path = %path.display(), "Watching parent directory of missing settings file");
            let target = parent.join(file_name);
            (parent, target)
        };

        self.watcher
            .lock()
            .await
            .watch(&watch_root, RecursiveMode::NonRecursive)
            .map_err(|e| ExportError::WatchError(format!("Failed to watch path: {}", e)))?;

        let mut targets = self.targets.write();
        if !targets.contains(&target) {
            targets.push(target);
        }
        Ok(())
    }

    /// Debounce window.
    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Files whose changes are reported.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.targets.read().clone()
    }
}

/// Guard keeping a settings reload loop alive.
///
/// Dropping it stops watching.
pub struct SettingsWatch {
    watcher: SettingsWatcher,
    task: JoinHandle<()>,
}

impl SettingsWatch {
    pub(crate) fn new(watcher: SettingsWatcher, task: JoinHandle<()>) -> Self {
        Self { watcher, task }
    }

    /// The underlying watcher.
    pub fn watcher(&self) -> &SettingsWatcher {
        &self.watcher
    }
}

impl Drop for SettingsWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_watch_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("export.yaml");
        fs::write(&path, "delay: 1").unwrap();

        let (watcher, _rx) = SettingsWatcher::new(Duration::from_millis(50)).unwrap();
        watcher.watch(&path).await.unwrap();
        watcher.watch(&path).await.unwrap();

        assert_eq!(watcher.watched_paths().len(), 1);
        assert_eq!(watcher.debounce(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_watch_missing_directory() {
        let (watcher, _rx) = SettingsWatcher::new(Duration::from_millis(50)).unwrap();
        assert!(watcher.watch("/nonexistent/export.yaml").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_file_is_watched_until_created() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("export.local.yaml");

        let (watcher, mut rx) = SettingsWatcher::new(Duration::from_millis(50)).unwrap();
        watcher.watch(&path).await.unwrap();
        assert_eq!(
            watcher.watched_paths(),
            vec![temp_dir.path().canonicalize().unwrap().join("export.local.yaml")]
        );

        // Siblings in the same directory are ignored.
        fs::write(temp_dir.path().join("unrelated.yaml"), "x: 1").unwrap();
        assert!(timeout(Duration::from_millis(300), rx.recv()).await.is_err());

        fs::write(&path, "delay: 2").unwrap();
        let signal = timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(matches!(signal, Ok(Some(()))));
    }

    #[tokio::test]
    async fn test_change_emits_signal() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("export.yaml");
        fs::write(&path, "delay: 1").unwrap();

        let (watcher, mut rx) = SettingsWatcher::new(Duration::from_millis(50)).unwrap();
        watcher.watch(&path).await.unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            fs::write(&path, "delay: 2").unwrap();
        });

        let signal = timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(matches!(signal, Ok(Some(()))));
    }
}
