//! Change capture and the per-unit-of-work context.
//!
//! The host opens a [`UnitOfWork`] per request (or job), reports every saved
//! configuration entry to it, and lets it go out of scope. When it is
//! dropped, or explicitly [`finish`](UnitOfWork::finish)ed, a unit of work
//! that exported at least one change either notifies the webhook right away
//! (no delay configured) or pushes the shared due time.
//!
//! ```rust,no_run
//! use config_auto_export::prelude::*;
//! use std::sync::Arc;
//!
//! # fn example(store: Arc<MemoryConfigStore>, settings: SettingsHandle) -> Result<()> {
//! let exporter = Exporter::builder()
//!     .with_settings(settings)
//!     .with_reader(store)
//!     .build()?;
//!
//! let mut work = exporter.begin();
//! work.on_config_saved("system.site")?;
//! work.on_config_saved("system.performance")?;
//! drop(work); // evaluates the trigger
//!
//! // Later, from a periodic job:
//! exporter.check_due_date()?;
//! # Ok(())
//! # }
//! ```

use crate::error::{ExportError, Result};
use crate::schedule::{DueState, DueTimeScheduler, ScheduleDecision};
use crate::settings::{ExportSettings, SettingsHandle};
use crate::split::{MODULE_LIST_KEY, SplitFilter, SplitProvider};
use crate::store::{Clock, ConfigData, ConfigReader, MemoryStateStore, StateStore, SystemClock};
use crate::target::{ExportTarget, FileTarget, LANGUAGE_COLLECTION_PREFIX};
use crate::trigger::{ExportTrigger, TriggerOutcome};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Result of reporting one saved entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// The entry was written to the export target.
    Written,
    /// The entry is claimed by a split and was not written.
    Excluded,
    /// The entry no longer exists in the store; nothing was written.
    Missing,
    /// Capture is suspended for this unit of work by an import.
    Inactive,
    /// Export is disabled or its directory is unusable.
    Disabled,
}

/// Result of evaluating a finished unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    /// No change was exported.
    Idle,
    /// No delay is configured; the trigger ran immediately.
    Notified(TriggerOutcome),
    /// The shared due time was set or kept.
    Scheduled(ScheduleDecision),
}

#[derive(Debug, Clone)]
struct EnabledCheck {
    enabled: bool,
    directory: PathBuf,
    usable: bool,
}

/// Process-wide export service.
///
/// Holds the collaborators and the caches that live as long as the process:
/// the directory check and the split rules. Cheap to share behind an `Arc`.
pub struct Exporter {
    settings: SettingsHandle,
    reader: Arc<dyn ConfigReader>,
    scheduler: DueTimeScheduler,
    clock: Arc<dyn Clock>,
    splits: SplitFilter,
    trigger: ExportTrigger,
    target: Option<Arc<dyn ExportTarget>>,
    enabled: Mutex<Option<EnabledCheck>>,
}

impl Exporter {
    /// Start building an exporter.
    pub fn builder() -> ExporterBuilder {
        ExporterBuilder::new()
    }

    /// Open a unit of work. The request time is read from the clock now.
    pub fn begin(&self) -> UnitOfWork<'_> {
        UnitOfWork {
            exporter: self,
            settings: self.settings.get(),
            request_time: self.clock.now(),
            active: true,
            trigger_needed: false,
            accepted: 0,
            finished: false,
        }
    }

    /// Fire the notification if the pending due time has been reached.
    ///
    /// Meant to be called by a periodic driver. Returns `None` when nothing
    /// was due. The due time is cleared after the trigger ran, whether or not
    /// delivery succeeded.
    ///
    /// # Errors
    ///
    /// Returns an error if the state store cannot be read or written.
    pub fn check_due_date(&self) -> Result<Option<TriggerOutcome>> {
        let now = self.clock.now();
        let Some(due_at) = self.scheduler.matured(now)? else {
            return Ok(None);
        };

        tracing::info!(due_at, now, "Config auto export is due");
        let outcome = self.trigger.trigger_export(&self.settings.get());
        self.scheduler.clear()?;
        Ok(Some(outcome))
    }

    /// Run the notification now with the current settings.
    pub fn trigger_export(&self) -> TriggerOutcome {
        self.trigger.trigger_export(&self.settings.get())
    }

    /// Current due state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state store cannot be read.
    pub fn due_state(&self) -> Result<DueState> {
        self.scheduler.due_state()
    }

    /// Settings handle in use.
    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    /// Split filter in use.
    pub fn splits(&self) -> &SplitFilter {
        &self.splits
    }

    /// Whether capture is possible with the current settings.
    pub fn is_enabled(&self) -> bool {
        self.enabled_for(&self.settings.get())
    }

    fn enabled_for(&self, settings: &ExportSettings) -> bool {
        let mut cache = self.enabled.lock();
        if let Some(check) = cache.as_ref() {
            if check.enabled == settings.enabled && check.directory == settings.directory {
                return check.usable;
            }
        }

        let usable = settings.enabled
            && (self.target.is_some() || prepare_directory(&settings.directory));
        *cache = Some(EnabledCheck {
            enabled: settings.enabled,
            directory: settings.directory.clone(),
            usable,
        });
        usable
    }

    fn target_for(&self, settings: &ExportSettings) -> Arc<dyn ExportTarget> {
        match &self.target {
            Some(target) => Arc::clone(target),
            None => Arc::new(FileTarget::new(&settings.directory)),
        }
    }
}

const WRITE_CHECK_FILE: &str = ".config_auto_export.write-check";

/// Create the export directory if needed and make sure it is writable.
///
/// Writability is checked by creating and removing a file, since permission
/// bits alone do not account for ownership. A directory without any write
/// bit gets one added before giving up.
fn prepare_directory(directory: &Path) -> bool {
    if directory.as_os_str().is_empty() {
        tracing::warn!("Config auto export is enabled without a directory");
        return false;
    }

    if let Err(e) = fs::create_dir_all(directory) {
        tracing::warn!(directory = %directory.display(), error = %e, "Unable to create export directory");
        return false;
    }

    let first_error = match check_writable(directory) {
        Ok(()) => return true,
        Err(e) => e,
    };

    match fs::metadata(directory) {
        Ok(metadata) if metadata.permissions().readonly() => {
            let mut permissions = metadata.permissions();
            #[allow(clippy::permissions_set_readonly_false)]
            permissions.set_readonly(false);
            if fs::set_permissions(directory, permissions).is_ok()
                && check_writable(directory).is_ok()
            {
                return true;
            }
        }
        _ => {}
    }

    tracing::warn!(directory = %directory.display(), error = %first_error, "Export directory is not writable");
    false
}

fn check_writable(directory: &Path) -> std::io::Result<()> {
    let path = directory.join(WRITE_CHECK_FILE);
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)?;
    fs::remove_file(&path)
}

/// Builder for [`Exporter`].
#[derive(Default)]
pub struct ExporterBuilder {
    settings: Option<SettingsHandle>,
    reader: Option<Arc<dyn ConfigReader>>,
    state: Option<Arc<dyn StateStore>>,
    clock: Option<Arc<dyn Clock>>,
    split_provider: Option<Arc<dyn SplitProvider>>,
    target: Option<Arc<dyn ExportTarget>>,
    trigger: Option<ExportTrigger>,
    state_key: Option<String>,
}

impl ExporterBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings to follow. Defaults to disabled settings.
    pub fn with_settings(mut self, settings: SettingsHandle) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Canonical configuration store. Required.
    pub fn with_reader(mut self, reader: Arc<dyn ConfigReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    /// Durable state store for the due time. Defaults to process memory.
    pub fn with_state(mut self, state: Arc<dyn StateStore>) -> Self {
        self.state = Some(state);
        self
    }

    /// Store the due time under `key` instead of
    /// [`STATE_KEY_DUE_TIMESTAMP`](crate::schedule::STATE_KEY_DUE_TIMESTAMP).
    ///
    /// Lets several exporters share one state store.
    pub fn with_state_key(mut self, key: impl Into<String>) -> Self {
        self.state_key = Some(key.into());
        self
    }

    /// Clock for request times and due checks. Defaults to the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Source of split exclusion rules. Without one nothing is excluded.
    pub fn with_split_provider(mut self, provider: Arc<dyn SplitProvider>) -> Self {
        self.split_provider = Some(provider);
        self
    }

    /// Export somewhere other than the configured directory.
    ///
    /// The directory check is skipped for a custom target.
    pub fn with_target(mut self, target: Arc<dyn ExportTarget>) -> Self {
        self.target = Some(target);
        self
    }

    /// Custom trigger, e.g. with a different timeout.
    pub fn with_trigger(mut self, trigger: ExportTrigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Build the exporter.
    ///
    /// # Errors
    ///
    /// Returns an error if no reader was given or the default trigger cannot
    /// be constructed.
    pub fn build(self) -> Result<Exporter> {
        let reader = self
            .reader
            .ok_or_else(|| ExportError::Other("A configuration reader is required".to_string()))?;

        let trigger = match self.trigger {
            Some(trigger) => trigger,
            None => ExportTrigger::new()?,
        };

        let state = self.state.unwrap_or_else(|| {
            tracing::debug!("No state store given, due times will not survive restarts");
            Arc::new(MemoryStateStore::new())
        });

        let mut scheduler = DueTimeScheduler::new(state);
        if let Some(key) = self.state_key {
            scheduler = scheduler.with_key(key);
        }

        Ok(Exporter {
            settings: self
                .settings
                .unwrap_or_else(|| SettingsHandle::new(ExportSettings::default())),
            reader,
            scheduler,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            splits: SplitFilter::new(self.split_provider),
            trigger,
            target: self.target,
            enabled: Mutex::new(None),
        })
    }
}

/// Context of one request or job.
///
/// Carries the flags that decide what happens at its end: whether capture
/// is still active (an import switches it off) and whether anything was
/// exported. The end-of-work evaluation runs exactly once, in
/// [`finish`](Self::finish) or on drop, on every exit path.
pub struct UnitOfWork<'a> {
    exporter: &'a Exporter,
    settings: Arc<ExportSettings>,
    request_time: i64,
    active: bool,
    trigger_needed: bool,
    accepted: usize,
    finished: bool,
}

impl UnitOfWork<'_> {
    /// Clock reading taken when the unit of work began.
    pub fn request_time(&self) -> i64 {
        self.request_time
    }

    /// Whether changes are still being captured.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether at least one change was exported.
    pub fn trigger_needed(&self) -> bool {
        self.trigger_needed
    }

    /// Number of exported changes.
    pub fn accepted(&self) -> usize {
        self.accepted
    }

    /// A configuration import is being validated: stop capturing.
    ///
    /// Imported entries come from the export itself, so mirroring them back
    /// would be redundant. Capture stays off for the rest of this unit of work.
    pub fn on_import_validation(&mut self) {
        if self.active {
            tracing::debug!("Configuration import started, suspending capture");
        }
        self.active = false;
    }

    /// A configuration entry was saved.
    ///
    /// The entry is re-read from the store so the export reflects the saved
    /// state.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the export cannot be
    /// written.
    pub fn on_config_saved(&mut self, key: &str) -> Result<CaptureOutcome> {
        if let Some(skipped) = self.gate() {
            return Ok(skipped);
        }

        let splits = &self.exporter.splits;
        if splits.is_excluded(key) {
            tracing::debug!(key, "Skipping export of split configuration");
            return Ok(CaptureOutcome::Excluded);
        }

        let Some(mut data) = self.exporter.reader.read(key)? else {
            tracing::debug!(key, "Saved configuration is no longer in the store");
            return Ok(CaptureOutcome::Missing);
        };

        if key == MODULE_LIST_KEY {
            let removed = splits.rules().strip_module_list(&mut data);
            if removed > 0 {
                tracing::debug!(key, removed, "Stripped split modules from module list");
            }
        }

        self.exporter.target_for(&self.settings).write(key, &data)?;
        self.accept(key, None);
        Ok(CaptureOutcome::Written)
    }

    /// A language override of a configuration entry was saved.
    ///
    /// Written to the `language.<locale>` collection of the export.
    ///
    /// # Errors
    ///
    /// Returns an error if the export cannot be written.
    pub fn on_translation_saved(
        &mut self,
        key: &str,
        locale: &str,
        data: &ConfigData,
    ) -> Result<CaptureOutcome> {
        if let Some(skipped) = self.gate() {
            return Ok(skipped);
        }

        let collection = format!("{LANGUAGE_COLLECTION_PREFIX}{locale}");
        self.exporter
            .target_for(&self.settings)
            .collection(&collection)
            .write(key, data)?;
        self.accept(key, Some(locale));
        Ok(CaptureOutcome::Written)
    }

    /// Evaluate the unit of work now and return what happened.
    ///
    /// # Errors
    ///
    /// Returns an error if the due time cannot be stored.
    pub fn finish(mut self) -> Result<WorkOutcome> {
        self.finished = true;
        self.complete()
    }

    fn gate(&self) -> Option<CaptureOutcome> {
        if !self.active {
            return Some(CaptureOutcome::Inactive);
        }
        if !self.exporter.enabled_for(&self.settings) {
            return Some(CaptureOutcome::Disabled);
        }
        None
    }

    fn accept(&mut self, key: &str, locale: Option<&str>) {
        tracing::debug!(key, locale, "Exported configuration change");
        self.trigger_needed = true;
        self.accepted += 1;
    }

    fn complete(&mut self) -> Result<WorkOutcome> {
        if !self.trigger_needed {
            return Ok(WorkOutcome::Idle);
        }

        if self.settings.delay == 0 {
            let outcome = self.exporter.trigger.trigger_export(&self.settings);
            return Ok(WorkOutcome::Notified(outcome));
        }

        let decision = self
            .exporter
            .scheduler
            .schedule(&self.settings, self.request_time)?;
        Ok(WorkOutcome::Scheduled(decision))
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Err(e) = self.complete() {
            tracing::error!(error = %e, accepted = self.accepted, "Failed to schedule config auto export");
        }
    }
}
