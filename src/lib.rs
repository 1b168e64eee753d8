//! # config-auto-export
//!
//! Mirror configuration changes into an export directory as they happen, and
//! notify an external webhook once the changes have settled.
//!
//! ## Overview
//!
//! Every saved configuration entry is written as `<key>.yml` into the export
//! directory, unless a split claims it. A unit of work that exported at least
//! one entry then either calls the webhook right away or pushes a single
//! shared due time; a periodic check fires the webhook once that time has
//! passed. Bursts of changes therefore produce one notification.
//!
//! - [`settings`]: layered, validated, hot-reloadable export settings
//! - [`capture`]: the [`Exporter`](capture::Exporter) and its per-request
//!   [`UnitOfWork`](capture::UnitOfWork)
//! - [`split`]: keys and modules that must stay out of the export
//! - [`schedule`]: the debounced due time
//! - [`trigger`]: webhook parameters and delivery
//! - [`store`] and [`target`]: where configuration is read from and written to
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use config_auto_export::prelude::*;
//! use std::sync::Arc;
//!
//! # fn example() -> config_auto_export::error::Result<()> {
//! let settings = SettingsBuilder::new()
//!     .with_file("config/auto_export.yaml")
//!     .with_env_overrides("AUTO_EXPORT", "__")
//!     .build()?;
//!
//! let store = Arc::new(FileConfigStore::new("var/config/active"));
//! let exporter = Exporter::builder()
//!     .with_settings(settings)
//!     .with_reader(store.clone())
//!     .with_state(Arc::new(FileStateStore::new("var/state.json")))
//!     .with_split_provider(Arc::new(ConfigSplitProvider::new(store)))
//!     .build()?;
//!
//! {
//!     let mut work = exporter.begin();
//!     work.on_config_saved("system.site")?;
//! } // the webhook is called or the due time is pushed here
//!
//! exporter.check_due_date()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `file-watch` (default): reload settings files when they change
//! - `cron`: a tokio task that runs the due-date check periodically

#![warn(missing_docs, rust_2024_compatibility)]
#![deny(unsafe_code)]

pub mod capture;
pub mod error;
pub mod schedule;
pub mod settings;
pub mod split;
pub mod store;
pub mod target;
pub mod trigger;

#[cfg(feature = "cron")]
pub mod cron;

/// Convenient re-exports for common usage patterns.
pub mod prelude {
    pub use crate::capture::{CaptureOutcome, Exporter, ExporterBuilder, UnitOfWork, WorkOutcome};
    pub use crate::error::{ExportError, Result, ValidationError};
    pub use crate::schedule::{DueState, ScheduleDecision};
    pub use crate::settings::{ExportSettings, SettingsBuilder, SettingsHandle, Validate};
    pub use crate::split::{ConfigSplitProvider, SplitDefinition, SplitProvider, StaticSplitProvider};
    pub use crate::store::{
        Clock, ConfigData, ConfigReader, FileConfigStore, FileStateStore, MemoryConfigStore,
        MemoryStateStore, StateStore, SystemClock,
    };
    pub use crate::target::{ExportTarget, FileTarget};
    pub use crate::trigger::{ExportTrigger, TriggerOutcome};

    #[cfg(feature = "cron")]
    pub use crate::cron::spawn_due_check;
}
