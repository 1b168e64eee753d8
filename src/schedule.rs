//! The single pending due time that debounces export notifications.

use crate::error::Result;
use crate::settings::ExportSettings;
use crate::store::StateStore;
use std::sync::Arc;

/// State key holding the pending due time.
pub const STATE_KEY_DUE_TIMESTAMP: &str = "config_auto_export.due_next.timestamp";

/// Whether a notification is waiting to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueState {
    /// Nothing is pending.
    Unset,
    /// A notification fires once the clock reaches this unix time.
    Pending(i64),
}

/// What [`DueTimeScheduler::schedule`] did with the due time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleDecision {
    /// The due time was set to this value.
    Scheduled(i64),
    /// An earlier due time was kept because the delay is anchored to the first change.
    Kept(i64),
}

impl ScheduleDecision {
    /// The due time in effect after scheduling.
    pub fn due_at(self) -> i64 {
        match self {
            Self::Scheduled(due_at) | Self::Kept(due_at) => due_at,
        }
    }
}

/// Maintains the due time in the durable state store.
///
/// Concurrent units of work are not coordinated; the last write wins.
pub struct DueTimeScheduler {
    state: Arc<dyn StateStore>,
    key: String,
}

impl DueTimeScheduler {
    /// Create a scheduler storing its due time under [`STATE_KEY_DUE_TIMESTAMP`].
    pub fn new(state: Arc<dyn StateStore>) -> Self {
        Self {
            state,
            key: STATE_KEY_DUE_TIMESTAMP.to_string(),
        }
    }

    /// Store the due time under a different key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// State key in use.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current due state. A stored zero counts as unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the state store cannot be read.
    pub fn due_state(&self) -> Result<DueState> {
        Ok(match self.state.get(&self.key)? {
            Some(due_at) if due_at != 0 => DueState::Pending(due_at),
            _ => DueState::Unset,
        })
    }

    /// Record that a unit of work accepted changes at `request_time`.
    ///
    /// The due time becomes `request_time + delay`, unless the delay is
    /// anchored to the first change and a due time is already pending.
    /// Callers only schedule when `settings.delay` is non-zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the state store cannot be read or written.
    pub fn schedule(
        &self,
        settings: &ExportSettings,
        request_time: i64,
    ) -> Result<ScheduleDecision> {
        if settings.delay_from_first {
            if let DueState::Pending(due_at) = self.due_state()? {
                tracing::debug!(due_at, "Keeping due time anchored to first change");
                return Ok(ScheduleDecision::Kept(due_at));
            }
        }

        let delay = i64::try_from(settings.delay).unwrap_or(i64::MAX);
        let due_at = request_time.saturating_add(delay);
        self.state.set(&self.key, due_at)?;
        tracing::debug!(due_at, "Scheduled config auto export");
        Ok(ScheduleDecision::Scheduled(due_at))
    }

    /// The pending due time if it has been reached at `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state store cannot be read.
    pub fn matured(&self, now: i64) -> Result<Option<i64>> {
        Ok(match self.due_state()? {
            DueState::Pending(due_at) if due_at <= now => Some(due_at),
            _ => None,
        })
    }

    /// Forget the pending due time.
    ///
    /// # Errors
    ///
    /// Returns an error if the state store cannot be written.
    pub fn clear(&self) -> Result<()> {
        self.state.delete(&self.key)
    }
}
