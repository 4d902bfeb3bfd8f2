//! In-memory job store, the single synchronization point for job state.
//!
//! The outer `RwLock` is held only long enough to find or insert a record;
//! every record has its own `Mutex`, so merges on different jobs never wait on
//! each other. Snapshots are published while the record lock is held, which
//! makes the broadcast order identical to the merge order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::broadcast::job_progress::{
    JobProgressBroadcaster, JobStatus, Stage, StepState, Subscription,
};
use crate::error::StoreError;

// ─── JobRecord ──────────────────────────────────────────────────────────────

/// State tracked for one upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Unique job identifier.
    pub job_id: String,
    /// Original filename of the upload.
    pub filename: String,
    /// Current stage.
    pub stage: Stage,
    /// Overall job status.
    pub status: JobStatus,
    /// Overall progress in percent.
    pub progress: u8,
    /// Stage-scoped status note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Failure description, present only when the job failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Stage that was active when the job failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    fn new(job_id: &str, filename: &str) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.to_string(),
            filename: filename.to_string(),
            stage: Stage::Intake,
            status: JobStatus::Pending,
            progress: 0,
            message: Some("Job queued for processing".to_string()),
            error_detail: None,
            failed_stage: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true if this job is finished (completed or failed).
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Display state of every work stage.
    pub fn step_states(&self) -> Vec<(Stage, StepState)> {
        Stage::WORK
            .iter()
            .map(|&stage| (stage, self.step_state(stage)))
            .collect()
    }

    fn step_state(&self, stage: Stage) -> StepState {
        let relative = |current: Stage, on_current: StepState| {
            if stage < current {
                StepState::Done
            } else if stage == current {
                on_current
            } else {
                StepState::Waiting
            }
        };

        match self.status {
            JobStatus::Pending => StepState::Waiting,
            JobStatus::Running => relative(self.stage, StepState::Active),
            JobStatus::Completed => StepState::Done,
            JobStatus::Failed => {
                relative(self.failed_stage.unwrap_or(Stage::Intake), StepState::Failed)
            }
        }
    }

    /// Validates and applies an update in place.
    fn apply(&mut self, update: JobUpdate) -> Result<(), String> {
        if self.status.is_terminal() {
            return Err(format!("job is already {:?}", self.status).to_lowercase());
        }

        let next_stage = update.stage.unwrap_or(self.stage);
        let next_status = update.status.unwrap_or(self.status);

        if !self.stage.can_transition_to(next_stage) {
            return Err(format!(
                "stage cannot move from {} to {}",
                self.stage, next_stage
            ));
        }
        if (next_status == JobStatus::Failed) != (next_stage == Stage::Error) {
            return Err(format!(
                "status {:?} is inconsistent with stage {}",
                next_status, next_stage
            ));
        }
        if (next_status == JobStatus::Completed) != (next_stage == Stage::Completed) {
            return Err(format!(
                "status {:?} is inconsistent with stage {}",
                next_status, next_stage
            ));
        }
        if self.status == JobStatus::Running && next_status == JobStatus::Pending {
            return Err("a running job cannot return to pending".to_string());
        }

        if let Some(progress) = update.progress {
            if progress > 100 {
                return Err(format!("progress {} exceeds 100", progress));
            }
            if progress < self.progress && next_status != JobStatus::Failed {
                return Err(format!(
                    "progress may not decrease ({} -> {})",
                    self.progress, progress
                ));
            }
        }
        let next_progress = update.progress.unwrap_or(self.progress);
        if next_status == JobStatus::Completed && next_progress != 100 {
            return Err(format!("completed job must be at 100%, got {}", next_progress));
        }

        match (&update.error_detail, next_status) {
            (None, JobStatus::Failed) => {
                return Err("a failed job requires an error detail".to_string());
            }
            (Some(_), status) if status != JobStatus::Failed => {
                return Err("error detail is only allowed on failure".to_string());
            }
            _ => {}
        }

        if next_status == JobStatus::Failed {
            self.failed_stage = Some(self.stage);
        }
        self.stage = next_stage;
        self.status = next_status;
        self.progress = next_progress;
        if update.message.is_some() {
            self.message = update.message;
        }
        if update.error_detail.is_some() {
            self.error_detail = update.error_detail;
        }
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + Duration::microseconds(1)
        };
    }
}

// ─── JobUpdate ──────────────────────────────────────────────────────────────

/// Partial update merged into a record. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobUpdate {
    pub stage: Option<Stage>,
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub error_detail: Option<String>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn error_detail(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }

    /// Terminal failure update.
    pub fn failed(detail: impl Into<String>) -> Self {
        Self::new()
            .stage(Stage::Error)
            .status(JobStatus::Failed)
            .error_detail(detail)
    }

    /// Terminal success update.
    pub fn completed(message: impl Into<String>) -> Self {
        Self::new()
            .stage(Stage::Completed)
            .status(JobStatus::Completed)
            .progress(100)
            .message(message)
    }
}

/// Number of jobs per status.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct JobCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

// ─── JobStore ───────────────────────────────────────────────────────────────

type Entry = Arc<Mutex<JobRecord>>;

fn lock_record(entry: &Mutex<JobRecord>) -> MutexGuard<'_, JobRecord> {
    match entry.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            log::warn!("Job record lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Concurrency-safe map from job id to job record.
pub struct JobStore {
    jobs: RwLock<HashMap<String, Entry>>,
    broadcaster: JobProgressBroadcaster,
}

impl JobStore {
    /// Creates a store that publishes every merge through `broadcaster`.
    pub fn new(broadcaster: JobProgressBroadcaster) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            broadcaster,
        }
    }

    pub fn broadcaster(&self) -> &JobProgressBroadcaster {
        &self.broadcaster
    }

    fn entry(&self, job_id: &str) -> Result<Entry, StoreError> {
        let jobs = match self.jobs.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        jobs.get(job_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))
    }

    /// Creates a new record and opens its progress channel.
    pub fn create(&self, job_id: &str, filename: &str) -> Result<JobRecord, StoreError> {
        let mut jobs = match self.jobs.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        if jobs.contains_key(job_id) {
            return Err(StoreError::DuplicateJob(job_id.to_string()));
        }

        let record = JobRecord::new(job_id, filename);
        jobs.insert(job_id.to_string(), Arc::new(Mutex::new(record.clone())));
        self.broadcaster.open(job_id);

        log::debug!("Created job {} for {}", job_id, filename);
        Ok(record)
    }

    /// Returns a snapshot of a job.
    pub fn get(&self, job_id: &str) -> Result<JobRecord, StoreError> {
        let entry = self.entry(job_id)?;
        let record = lock_record(&entry);
        Ok(record.clone())
    }

    /// Applies a partial update and publishes the resulting snapshot.
    ///
    /// A rejected update leaves the record untouched.
    pub fn merge(&self, job_id: &str, update: JobUpdate) -> Result<JobRecord, StoreError> {
        let entry = self.entry(job_id)?;
        let mut record = lock_record(&entry);

        let mut next = record.clone();
        next.apply(update)
            .map_err(|reason| StoreError::InvalidTransition {
                job_id: job_id.to_string(),
                reason,
            })?;
        *record = next;

        self.broadcaster.publish(&record);
        Ok(record.clone())
    }

    /// Opens a subscription on a job.
    ///
    /// The attach-time snapshot and the receiver are taken under the record
    /// lock, so the subscriber sees every merge applied after this call.
    pub fn subscribe(&self, job_id: &str) -> Result<Subscription, StoreError> {
        let entry = self.entry(job_id)?;
        let record = lock_record(&entry);
        Ok(self.broadcaster.attach(&record))
    }

    /// Closes a job's progress channel.
    pub fn close(&self, job_id: &str) {
        self.broadcaster.close(job_id);
    }

    /// Returns all jobs, newest first.
    pub fn list(&self) -> Vec<JobRecord> {
        let entries: Vec<Entry> = match self.jobs.read() {
            Ok(guard) => guard.values().cloned().collect(),
            Err(poisoned) => {
                log::warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner().values().cloned().collect()
            }
        };
        let mut result: Vec<JobRecord> = entries.iter().map(|e| lock_record(e).clone()).collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        result
    }

    /// Returns the count of jobs by status.
    pub fn counts(&self) -> JobCounts {
        let mut counts = JobCounts::default();
        for job in self.list() {
            match job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new(JobProgressBroadcaster::default())
    }
}
