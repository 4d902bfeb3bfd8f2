use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::broadcast::job_progress::Stage;

#[derive(Error, Debug)]
pub enum SitrepError {
    #[error("Invalid upload: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Stage '{stage}' failed: {message}")]
    StageFailure { stage: Stage, message: String },

    #[error("Subscription to job {job_id} timed out after {after:?}")]
    SubscriptionTimeout { job_id: String, after: Duration },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SitrepError {
    /// Returns true if this error means the requested job or artifact does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SitrepError::Store(StoreError::NotFound(_))
                | SitrepError::Storage(StorageError::ArtifactNotFound { .. })
        )
    }
}

/// Errors raised by the job store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Job already exists: {0}")]
    DuplicateJob(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Invalid transition for job {job_id}: {reason}")]
    InvalidTransition { job_id: String, reason: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid value for environment variable {name}: {reason}")]
    InvalidEnv { name: String, reason: String },
}

/// Failures reported by stage collaborators.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to decode upload: {0}")]
    Decode(String),

    #[error("Failed to parse CSV: {0}")]
    CsvParse(String),

    #[error("Upload contains no data rows")]
    EmptyData,

    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Analysis request failed: {0}")]
    AnalysisRequest(String),

    #[error("Analysis workflow failed: {0}")]
    AnalysisWorkflow(String),

    #[error("Analysis response malformed: {0}")]
    AnalysisResponse(String),

    #[error("Report rendering failed: {0}")]
    Render(String),

    #[error("Failed to read upload '{path}': {source}")]
    ReadUpload {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{artifact} for job {job_id} not found")]
    ArtifactNotFound {
        job_id: String,
        artifact: &'static str,
    },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker pool is shut down")]
    ShutDown,
}

pub type Result<T> = std::result::Result<T, SitrepError>;
