//! Collaborators the pipeline reads from and persists into.
//!
//! The host owns the configuration storage engine and the durable state
//! store; this module only defines the seams ([`ConfigReader`],
//! [`StateStore`], [`Clock`]) together with in-memory and file-backed
//! implementations.

mod clock;
mod config_store;
mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config_store::{ConfigReader, FileConfigStore, MemoryConfigStore};
pub use state::{FileStateStore, MemoryStateStore, StateStore};

/// A full configuration snapshot as stored under one key.
pub type ConfigData = serde_yaml::Value;
