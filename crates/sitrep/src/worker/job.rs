use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::broadcast::{JobStatus, Stage, SummaryStats};

/// One accepted upload waiting to be processed.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    /// Filename as supplied by the uploader.
    pub filename: String,
    /// Where the payload was stored.
    pub upload_path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        filename: impl Into<String>,
        upload_path: PathBuf,
        size_bytes: u64,
    ) -> Self {
        Self {
            id: id.into(),
            filename: filename.into(),
            upload_path,
            size_bytes,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobResult {
    pub job_id: String,
    pub status: JobStatus,
    pub stats: Option<SummaryStats>,
    pub document_path: Option<PathBuf>,
    /// Stage that was running when the job failed.
    pub failed_stage: Option<Stage>,
    pub error: Option<String>,
}

impl JobResult {
    pub fn success(job: &Job, stats: SummaryStats, document_path: PathBuf) -> Self {
        Self {
            job_id: job.id.clone(),
            status: JobStatus::Completed,
            stats: Some(stats),
            document_path: Some(document_path),
            failed_stage: None,
            error: None,
        }
    }

    pub fn failure(job: &Job, stage: Stage, error: String) -> Self {
        Self {
            job_id: job.id.clone(),
            status: JobStatus::Failed,
            stats: None,
            document_path: None,
            failed_stage: Some(stage),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}
