use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::broadcast::SummaryStats;
use crate::processor::{AnalysisResult, DocumentRef};

/// Outputs of a completed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobArtifacts {
    pub job_id: String,
    pub filename: String,
    pub stats: SummaryStats,
    pub analysis: AnalysisResult,
    pub document: DocumentRef,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Completed-job outputs keyed by job id.
#[derive(Default)]
pub struct ArtifactStore {
    entries: RwLock<HashMap<String, JobArtifacts>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, artifacts: JobArtifacts) {
        let mut entries = match self.entries.write() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Artifact store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        entries.insert(artifacts.job_id.clone(), artifacts);
    }

    pub fn get(&self, job_id: &str) -> Option<JobArtifacts> {
        let entries = match self.entries.read() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Artifact store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        entries.get(job_id).cloned()
    }

    pub fn stats(&self, job_id: &str) -> Option<SummaryStats> {
        self.get(job_id).map(|a| a.stats)
    }

    pub fn analysis(&self, job_id: &str) -> Option<AnalysisResult> {
        self.get(job_id).map(|a| a.analysis)
    }

    /// Drops entries whose document no longer exists on disk.
    ///
    /// Returns the number of entries removed.
    pub fn prune_missing(&self) -> usize {
        let mut entries = match self.entries.write() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Artifact store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        let before = entries.len();
        entries.retain(|_, artifacts| artifacts.document.path.exists());
        let removed = before - entries.len();
        if removed > 0 {
            log::info!("Pruned {} artifact entries with missing documents", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
