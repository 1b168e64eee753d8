//! Periodic driver for the due-date check.
//!
//! Hosts with their own scheduler can call
//! [`Exporter::check_due_date`] directly instead.

use crate::capture::Exporter;
use crate::trigger::TriggerOutcome;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Run [`Exporter::check_due_date`] every `period` until the handle is aborted.
///
/// The check runs on the blocking pool since it does file I/O and waits for
/// webhook delivery. Must be called from within a tokio runtime.
pub fn spawn_due_check(exporter: Arc<Exporter>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let exporter = Arc::clone(&exporter);
            match tokio::task::spawn_blocking(move || exporter.check_due_date()).await {
                Ok(Ok(Some(TriggerOutcome::Failed))) => {
                    tracing::warn!("Due config auto export was not delivered")
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Due date check failed"),
                Err(e) => tracing::warn!(error = %e, "Due date check task failed"),
            }
        }
    })
}
