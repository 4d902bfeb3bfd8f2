use std::sync::Arc;

use crate::broadcast::{JobStatus, JobStore, JobUpdate, Stage};

/// Events emitted by the pipeline during processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A stage started; progress moves to the stage floor.
    StageEntered { stage: Stage, message: String },
    /// A stage succeeded; progress moves to the stage ceiling.
    StageFinished { stage: Stage, message: String },
    Completed { message: String },
    Failed { error: String },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Turns pipeline events into job store merges.
pub struct StoreProgress {
    store: Arc<JobStore>,
    job_id: String,
}

impl StoreProgress {
    pub fn new(store: Arc<JobStore>, job_id: &str) -> Self {
        Self {
            store,
            job_id: job_id.to_string(),
        }
    }

    fn update_for(event: ProgressEvent) -> JobUpdate {
        match event {
            ProgressEvent::StageEntered { stage, message } => {
                let (floor, _) = stage.progress_window().unwrap_or((0, 0));
                JobUpdate::new()
                    .stage(stage)
                    .status(JobStatus::Running)
                    .progress(floor)
                    .message(message)
            }
            ProgressEvent::StageFinished { stage, message } => {
                let (_, ceiling) = stage.progress_window().unwrap_or((0, 0));
                let update = JobUpdate::new().progress(ceiling).message(message);
                // The last work stage hands over to the completion merge.
                match stage.next() {
                    Some(next) if !next.is_terminal() => update.stage(next),
                    _ => update,
                }
            }
            ProgressEvent::Completed { message } => JobUpdate::completed(message),
            ProgressEvent::Failed { error } => JobUpdate::failed(error),
        }
    }
}

impl ProgressReporter for StoreProgress {
    fn report(&self, event: ProgressEvent) {
        if let Err(e) = self.store.merge(&self.job_id, Self::update_for(event)) {
            log::warn!("Dropped progress update for job {}: {}", self.job_id, e);
        }
    }
}
