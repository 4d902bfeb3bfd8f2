//! Test harness for running jobs end to end.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use sitrep::broadcast::{HistoryCache, StreamEvent};
use sitrep::processor::{Analyzer, AnalysisResult, CleanRecord, LanguageAnalyzer};
use sitrep::{Config, ProcessError, SitrepService};

/// Three rows, one repeated hit sentence. Two survive dedup: one domestic, one foreign.
pub const EXPORT_CSV: &str = "URL,来源名称,作者用户名称,标题,命中句子,语言\n\
    https://news.example/a,Daily,alice,Flood warning,Rivers are rising,Chinese\n\
    https://news.example/b,Wire,bob,Port reopens,Ships are moving again,English\n\
    https://news.example/a,Daily,alice,Flood warning,Rivers are rising,Chinese\n";

/// Header only, no rows.
pub const EMPTY_CSV: &str = "URL,来源名称,作者用户名称,标题,命中句子,语言\n";

/// Analyzer that waits until the gate is opened, then classifies by language.
pub struct GatedAnalyzer {
    gate: Arc<Semaphore>,
    inner: LanguageAnalyzer,
}

impl GatedAnalyzer {
    pub fn new() -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let analyzer = Arc::new(Self {
            gate: Arc::clone(&gate),
            inner: LanguageAnalyzer::new(),
        });
        (analyzer, gate)
    }
}

#[async_trait]
impl Analyzer for GatedAnalyzer {
    fn name(&self) -> &str {
        "gated"
    }

    async fn analyze(&self, records: &[CleanRecord]) -> Result<AnalysisResult, ProcessError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| ProcessError::AnalysisWorkflow(e.to_string()))?;
        self.inner.analyze(records).await
    }
}

/// Analyzer that never answers in time.
pub struct StalledAnalyzer;

#[async_trait]
impl Analyzer for StalledAnalyzer {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn analyze(&self, _records: &[CleanRecord]) -> Result<AnalysisResult, ProcessError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(AnalysisResult::default())
    }
}

/// A service whose data directory lives in a temp dir.
pub struct TestHarness {
    temp_dir: TempDir,
    pub service: Arc<SitrepService>,
    pub history: Mutex<HistoryCache>,
}

impl TestHarness {
    /// Service with the default language analyzer.
    pub fn new() -> Self {
        Self::build(|_| {}, None)
    }

    pub fn with_analyzer(analyzer: Arc<dyn Analyzer>) -> Self {
        Self::build(|_| {}, Some(analyzer))
    }

    /// Full control over config and analyzer.
    pub fn build<F>(customize: F, analyzer: Option<Arc<dyn Analyzer>>) -> Self
    where
        F: FnOnce(&mut Config),
    {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut config = Config::default();
        config.storage.data_directory = temp_dir.path().to_string_lossy().to_string();
        config.pipeline.max_concurrent_jobs = 4;
        customize(&mut config);

        let capacity = config.history.capacity;
        let service = match analyzer {
            Some(analyzer) => SitrepService::with_analyzer(config, analyzer),
            None => SitrepService::new(config).expect("Failed to build service"),
        };

        Self {
            temp_dir,
            service: Arc::new(service),
            history: Mutex::new(HistoryCache::new(capacity)),
        }
    }

    pub fn data_dir(&self) -> &std::path::Path {
        self.temp_dir.path()
    }

    pub fn submit(&self, filename: &str, content: &str) -> String {
        self.service
            .submit_upload(filename, content.as_bytes())
            .expect("upload rejected")
    }

    /// Drains a subscription until the stream ends.
    pub async fn collect_events(&self, job_id: &str) -> Vec<StreamEvent> {
        let mut subscription = self.service.subscribe(job_id).expect("subscribe failed");
        let mut events = Vec::new();
        while let Some(event) = subscription.next_event().await {
            events.push(event);
        }
        events
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().unwrap().len()
    }
}

/// Progress values of all `progress` events, consecutive repeats collapsed.
pub fn progress_values(events: &[StreamEvent]) -> Vec<u8> {
    let mut values: Vec<u8> = events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::Progress { job } => Some(job.progress),
            _ => None,
        })
        .collect();
    values.dedup();
    values
}

/// Event kinds in order, e.g. `["connected", "progress", "finished"]`.
pub fn kinds(events: &[StreamEvent]) -> Vec<&'static str> {
    events.iter().map(StreamEvent::kind).collect()
}
