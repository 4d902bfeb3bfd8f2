//! Entry point tying upload intake, job state and artifacts together.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::broadcast::{
    HistoryEntry, JobCounts, JobProgressBroadcaster, JobRecord, JobStatus, JobStore, JobUpdate,
    Subscription, SummaryStats,
};
use crate::config::{AnalysisBackend, Config};
use crate::error::{ProcessError, Result, SitrepError, StorageError};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::processor::{Analyzer, AnalysisResult, LanguageAnalyzer, WorkflowAnalyzer};
use crate::sanitize;
use crate::storage::{self, ArtifactStore, Document, UploadStorage};
use crate::worker::{Job, WorkerPool};

/// Builds the analyzer selected by the configuration.
pub fn analyzer_from_config(config: &Config) -> std::result::Result<Arc<dyn Analyzer>, ProcessError> {
    match config.analysis.backend {
        AnalysisBackend::Language => Ok(Arc::new(LanguageAnalyzer::new())),
        AnalysisBackend::Workflow => {
            let endpoint = config.analysis.endpoint.clone().ok_or_else(|| {
                ProcessError::AnalysisRequest("no workflow endpoint configured".to_string())
            })?;
            let analyzer = WorkflowAnalyzer::new(
                endpoint,
                config.analysis.api_key.clone(),
                Duration::from_secs(config.analysis.request_timeout_secs),
            )?;
            Ok(Arc::new(analyzer))
        }
    }
}

pub struct SitrepService {
    config: Arc<Config>,
    store: Arc<JobStore>,
    artifacts: Arc<ArtifactStore>,
    uploads: UploadStorage,
    pool: WorkerPool,
}

impl SitrepService {
    /// Builds the service with the analyzer chosen by `config`.
    pub fn new(config: Config) -> Result<Self> {
        let analyzer = analyzer_from_config(&config)
            .map_err(|e| crate::error::ConfigError::Validation {
                message: e.to_string(),
            })?;
        Ok(Self::with_analyzer(config, analyzer))
    }

    pub fn with_analyzer(config: Config, analyzer: Arc<dyn Analyzer>) -> Self {
        let broadcaster = JobProgressBroadcaster::new(
            config.stream.channel_capacity,
            Duration::from_secs(config.stream.inactivity_timeout_secs),
        );
        let store = Arc::new(JobStore::new(broadcaster));
        let artifacts = Arc::new(ArtifactStore::new());

        let pipeline = Arc::new(Pipeline::from_config(
            Arc::new(PipelineConfig::from_config(&config)),
            analyzer,
            Arc::clone(&artifacts),
        ));
        let pool = WorkerPool::new(
            pipeline,
            Arc::clone(&store),
            config.pipeline.max_concurrent_jobs,
        );

        Self {
            uploads: UploadStorage::new(config.storage.upload_directory()),
            config: Arc::new(config),
            store,
            artifacts,
            pool,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Validates and stores an upload, then queues its job.
    ///
    /// Returns as soon as the job is queued. Must be called from within a
    /// tokio runtime.
    pub fn submit_upload(&self, filename: &str, bytes: &[u8]) -> Result<String> {
        sanitize::validate_upload(filename, bytes, self.config.storage.max_upload_bytes)
            .map_err(SitrepError::Validation)?;

        let job_id = uuid::Uuid::new_v4().to_string();
        let upload_path = self.uploads.save(&job_id, "csv", bytes)?;
        let display_name = sanitize::sanitize_filename(filename);
        self.store.create(&job_id, &display_name)?;

        let job = Job::new(&job_id, &display_name, upload_path, bytes.len() as u64);
        if let Err(e) = self.pool.submit(job) {
            let _ = self.store.merge(&job_id, JobUpdate::failed(e.to_string()));
            self.store.close(&job_id);
            return Err(e.into());
        }

        tracing::info!(job_id = %job_id, filename = %display_name, size = bytes.len(), "upload accepted");
        Ok(job_id)
    }

    pub fn status(&self, job_id: &str) -> Result<JobRecord> {
        Ok(self.store.get(job_id)?)
    }

    pub fn subscribe(&self, job_id: &str) -> Result<Subscription> {
        Ok(self.store.subscribe(job_id)?)
    }

    /// Summary statistics of a completed job.
    pub fn summary_stats(&self, job_id: &str) -> Result<SummaryStats> {
        let record = self.store.get(job_id)?;
        let not_ready = || StorageError::ArtifactNotFound {
            job_id: job_id.to_string(),
            artifact: "Summary statistics",
        };
        if record.status != JobStatus::Completed {
            return Err(not_ready().into());
        }
        Ok(self.artifacts.stats(job_id).ok_or_else(not_ready)?)
    }

    /// Domestic and foreign items produced by the analysis stage.
    pub fn processed_data(&self, job_id: &str) -> Result<AnalysisResult> {
        let record = self.store.get(job_id)?;
        let not_ready = || StorageError::ArtifactNotFound {
            job_id: job_id.to_string(),
            artifact: "Processed data",
        };
        if record.status != JobStatus::Completed {
            return Err(not_ready().into());
        }
        Ok(self.artifacts.analysis(job_id).ok_or_else(not_ready)?)
    }

    /// Loads the rendered document of a completed job.
    pub fn document(&self, job_id: &str) -> Result<Document> {
        self.store.get(job_id)?;
        let artifacts = self
            .artifacts
            .get(job_id)
            .ok_or_else(|| StorageError::ArtifactNotFound {
                job_id: job_id.to_string(),
                artifact: "Document",
            })?;
        Ok(self.uploads.read_document(job_id, &artifacts.document)?)
    }

    /// History entry describing a completed job.
    pub fn history_entry(&self, job_id: &str) -> Result<HistoryEntry> {
        let stats = self.summary_stats(job_id)?;
        let artifacts = self
            .artifacts
            .get(job_id)
            .ok_or_else(|| StorageError::ArtifactNotFound {
                job_id: job_id.to_string(),
                artifact: "Document",
            })?;
        Ok(HistoryEntry {
            id: 0,
            job_id: job_id.to_string(),
            filename: artifacts.filename,
            summary_stats: stats,
            created_at: artifacts.created_at,
            completed_at: artifacts.completed_at,
            size_bytes: artifacts.document.size_bytes,
        })
    }

    pub fn jobs(&self) -> Vec<JobRecord> {
        self.store.list()
    }

    pub fn counts(&self) -> JobCounts {
        self.store.counts()
    }

    /// Starts the periodic upload and report cleanup.
    pub fn spawn_cleanup(&self) -> JoinHandle<()> {
        let storage = &self.config.storage;
        storage::spawn_sweeper(
            vec![storage.upload_directory(), storage.report_directory()],
            Duration::from_secs(storage.retention_hours * 3600),
            Duration::from_secs(storage.cleanup_interval_minutes * 60),
            Arc::clone(&self.artifacts),
        )
    }

    /// Aborts all job tasks. Records keep their last state.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}
