//! Bounded history of completed jobs.
//!
//! Entries are kept in insertion order. Upserting a job that is already
//! present replaces its entry in place; inserting past capacity evicts the
//! oldest entry.

use std::collections::VecDeque;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Item counts produced by a completed job.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SummaryStats {
    /// Rows read from the upload.
    pub total_items: usize,
    /// Rows left after deduplication.
    pub retained_items: usize,
    pub removed_duplicates: usize,
    pub domestic_items: usize,
    pub foreign_items: usize,
}

/// Summary of one completed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Cache-local id, assigned on first insert.
    #[serde(default)]
    pub id: u64,
    pub job_id: String,
    pub filename: String,
    pub summary_stats: SummaryStats,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Size of the generated document in bytes.
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryCache {
    capacity: usize,
    next_id: u64,
    entries: VecDeque<HistoryEntry>,
}

impl HistoryCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            next_id: 1,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts or replaces the entry for `entry.job_id` and returns its id.
    pub fn upsert(&mut self, mut entry: HistoryEntry) -> u64 {
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|e| e.job_id == entry.job_id)
        {
            entry.id = existing.id;
            *existing = entry;
            return existing.id;
        }

        entry.id = self.next_id;
        self.next_id += 1;
        let id = entry.id;

        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                log::debug!("Evicted history entry for job {}", evicted.job_id);
            }
        }
        id
    }

    /// Up to `limit` entries, most recently inserted first.
    pub fn list(&self, limit: usize) -> Vec<HistoryEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn get(&self, job_id: &str) -> Option<&HistoryEntry> {
        self.entries.iter().find(|e| e.job_id == job_id)
    }

    pub fn remove(&mut self, job_id: &str) -> Option<HistoryEntry> {
        let index = self.entries.iter().position(|e| e.job_id == job_id)?;
        self.entries.remove(index)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Changes the capacity, evicting the oldest entries if needed.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Loads a cache from a JSON file. A missing file yields an empty cache.
    pub fn load(path: &Path, capacity: usize) -> Result<Self, StorageError> {
        if !path.exists() {
            return Ok(Self::new(capacity));
        }
        let content = std::fs::read_to_string(path).map_err(|e| StorageError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        match serde_json::from_str::<HistoryCache>(&content) {
            Ok(mut cache) => {
                cache.set_capacity(capacity);
                Ok(cache)
            }
            Err(e) => {
                log::warn!(
                    "Ignoring unreadable history file {}: {}",
                    path.display(),
                    e
                );
                Ok(Self::new(capacity))
            }
        }
    }

    /// Writes the cache as JSON, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| StorageError::WriteFile {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        std::fs::write(path, json).map_err(|e| StorageError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

impl Default for HistoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
