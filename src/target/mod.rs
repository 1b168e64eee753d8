//! Durable export location for captured configuration.

mod file;

pub use file::{FileTarget, LANGUAGE_COLLECTION_PREFIX};

use crate::error::Result;
use crate::store::ConfigData;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

/// A location that mirrors configuration entries one key at a time.
pub trait ExportTarget: Send + Sync {
    /// Write the full snapshot of `key`, replacing any previous export.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized or written.
    fn write(&self, key: &str, data: &ConfigData) -> Result<()>;

    /// Read back the exported snapshot of `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the export exists but cannot be read or decoded.
    fn read(&self, key: &str) -> Result<Option<ConfigData>>;

    /// Remove everything stored in this target.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored data cannot be removed.
    fn remove_all(&self) -> Result<()>;

    /// Open a named sub-collection of this target, such as `language.fr`.
    fn collection(&self, name: &str) -> Box<dyn ExportTarget>;
}

/// Write content to a file atomically.
///
/// Content goes to a sibling `.tmp` file, is synced to disk, then renamed
/// over `path`. Parent directories are created as needed.
pub(crate) fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut temp_name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("export"));
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    {
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(content)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    fs::rename(&temp_path, path)?;
    Ok(())
}
