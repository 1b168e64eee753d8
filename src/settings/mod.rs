//! Export settings: loading, validation and hot reload.

mod builder;
mod handle;
mod loader;
mod model;
mod sources;

#[cfg(feature = "file-watch")]
mod watcher;

pub use builder::SettingsBuilder;
pub use handle::SettingsHandle;
pub use loader::SettingsLoader;
pub use model::{ExportSettings, Validate};
pub use sources::{ENV_PRIORITY, EnvSource, FILE_PRIORITY, FileSource, SettingsSource};

#[cfg(feature = "file-watch")]
pub use watcher::{SettingsWatch, SettingsWatcher};
