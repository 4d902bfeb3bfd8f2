//! Observer-side helper: follow one job to its end and record it in history.

use std::sync::Mutex;

use crate::broadcast::{HistoryCache, HistoryEntry, JobStatus, StreamEvent};
use crate::error::Result;
use crate::service::SitrepService;

/// How an observed job stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedOutcome {
    /// The job completed and its entry was upserted into the history.
    Completed(HistoryEntry),
    Failed { error_detail: String },
    /// No event arrived within the inactivity window.
    TimedOut,
    /// The stream ended before the job finished.
    Disconnected,
}

/// Subscribes to `job_id`, hands every event to `on_event`, and upserts a
/// history entry once the job completes.
pub async fn observe_job<F>(
    service: &SitrepService,
    job_id: &str,
    history: &Mutex<HistoryCache>,
    mut on_event: F,
) -> Result<ObservedOutcome>
where
    F: FnMut(&StreamEvent),
{
    let mut subscription = service.subscribe(job_id)?;
    let mut error_detail = None;

    while let Some(event) = subscription.next_event().await {
        on_event(&event);
        match event {
            StreamEvent::Error {
                error_detail: detail,
                ..
            } => error_detail = Some(detail),
            StreamEvent::Timeout { .. } => return Ok(ObservedOutcome::TimedOut),
            StreamEvent::Finished {
                status: JobStatus::Completed,
                ..
            } => {
                let entry = service.history_entry(job_id)?;
                let mut cache = match history.lock() {
                    Ok(g) => g,
                    Err(poisoned) => {
                        log::warn!("History cache lock was poisoned, recovering");
                        poisoned.into_inner()
                    }
                };
                let id = cache.upsert(entry.clone());
                return Ok(ObservedOutcome::Completed(HistoryEntry { id, ..entry }));
            }
            StreamEvent::Finished { .. } => {
                return Ok(ObservedOutcome::Failed {
                    error_detail: error_detail.unwrap_or_else(|| "unknown error".to_string()),
                });
            }
            StreamEvent::Connected { .. } | StreamEvent::Progress { .. } => {}
        }
    }

    Ok(ObservedOutcome::Disconnected)
}
