//! Stage collaborators invoked by the pipeline.
//!
//! Each stage delegates its actual work to one of the traits below so that
//! the orchestration in [`crate::pipeline`] stays independent of the CSV
//! format, the analysis backend and the report layout.

pub mod analyzer;
pub mod csv;
pub mod renderer;

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::broadcast::SummaryStats;
use crate::error::ProcessError;

pub use self::analyzer::{LanguageAnalyzer, WorkflowAnalyzer};
pub use self::csv::CsvRecordProcessor;
pub use self::renderer::MarkdownRenderer;

/// One parsed row, keyed by trimmed header.
pub type RawRecord = HashMap<String, String>;

/// A monitored media item after column mapping.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CleanRecord {
    pub url: Option<String>,
    pub source_name: Option<String>,
    pub author: Option<String>,
    pub title: Option<String>,
    pub hit_sentence: Option<String>,
    pub language: Option<String>,
}

/// Records that survived deduplication plus the counts behind them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupOutcome {
    pub records: Vec<CleanRecord>,
    /// Number of records fed into deduplication.
    pub total: usize,
    pub removed: usize,
}

impl DedupOutcome {
    pub fn retained(&self) -> usize {
        self.records.len()
    }
}

/// A categorized item returned by an analyzer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AnalysisItem {
    pub title: Option<String>,
    pub url: Option<String>,
    #[serde(alias = "sourceName")]
    pub source_name: Option<String>,
    pub author: Option<String>,
    pub summary: Option<String>,
}

impl From<&CleanRecord> for AnalysisItem {
    fn from(record: &CleanRecord) -> Self {
        Self {
            title: record.title.clone(),
            url: record.url.clone(),
            source_name: record.source_name.clone(),
            author: record.author.clone(),
            summary: record.hit_sentence.clone(),
        }
    }
}

/// Output of the analysis stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalysisResult {
    pub domestic: Vec<AnalysisItem>,
    pub foreign: Vec<AnalysisItem>,
}

/// Everything the renderer needs to produce a document.
#[derive(Debug, Clone)]
pub struct ReportInput {
    pub job_id: String,
    pub filename: String,
    pub generated_at: DateTime<Utc>,
    pub stats: SummaryStats,
    pub analysis: AnalysisResult,
}

/// A rendered document on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub content_type: String,
}

/// Parses, cleans and deduplicates uploaded records.
pub trait RecordProcessor: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<Vec<RawRecord>, ProcessError>;
    fn clean(&self, raw: Vec<RawRecord>) -> Result<Vec<CleanRecord>, ProcessError>;
    fn deduplicate(&self, records: Vec<CleanRecord>) -> DedupOutcome;
}

/// Splits records into domestic and foreign items.
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str;
    async fn analyze(&self, records: &[CleanRecord]) -> Result<AnalysisResult, ProcessError>;
}

/// Produces the report document for a job.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, input: &ReportInput) -> Result<DocumentRef, ProcessError>;
}
