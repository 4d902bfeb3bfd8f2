//! Periodic removal of expired uploads and reports.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;

use super::artifacts::ArtifactStore;
use crate::error::StorageError;

/// Result of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub files_deleted: usize,
    pub bytes_freed: u64,
}

/// Deletes regular files older than `max_age` directly inside each directory.
/// Missing directories are skipped.
pub fn sweep(directories: &[PathBuf], max_age: Duration) -> Result<SweepReport, StorageError> {
    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut report = SweepReport::default();

    for dir in directories {
        if !dir.is_dir() {
            continue;
        }
        let entries = std::fs::read_dir(dir).map_err(|e| StorageError::ReadFile {
            path: dir.clone(),
            source: e,
        })?;

        for entry in entries.flatten() {
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let expired = metadata
                .modified()
                .map(|modified| modified < cutoff)
                .unwrap_or(false);
            if expired {
                remove_file(&entry.path(), metadata.len(), &mut report);
            }
        }
    }

    if report.files_deleted > 0 {
        log::info!(
            "Cleanup removed {} files ({} bytes)",
            report.files_deleted,
            report.bytes_freed
        );
    }
    Ok(report)
}

fn remove_file(path: &Path, len: u64, report: &mut SweepReport) {
    match std::fs::remove_file(path) {
        Ok(()) => {
            report.files_deleted += 1;
            report.bytes_freed += len;
        }
        Err(e) => log::warn!("Failed to remove expired file {}: {}", path.display(), e),
    }
}

/// Runs [`sweep`] every `interval` until the task is aborted.
///
/// After each sweep, artifact entries whose document was removed are
/// dropped from `artifacts`.
pub fn spawn_sweeper(
    directories: Vec<PathBuf>,
    retention: Duration,
    interval: Duration,
    artifacts: Arc<ArtifactStore>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let dirs = directories.clone();
            let result = tokio::task::spawn_blocking(move || sweep(&dirs, retention)).await;
            match result {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => log::warn!("Cleanup sweep failed: {}", e),
                Err(e) => log::error!("Cleanup sweep panicked: {}", e),
            }
            artifacts.prune_missing();
        }
    })
}
