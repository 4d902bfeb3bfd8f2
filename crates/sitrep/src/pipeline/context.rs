use crate::broadcast::SummaryStats;
use crate::processor::{AnalysisResult, CleanRecord, DedupOutcome, DocumentRef, RawRecord};
use crate::worker::job::Job;

pub struct PipelineContext {
    // Input
    pub job: Job,

    // Intake result; drained by cleaning
    pub raw: Vec<RawRecord>,
    pub total_rows: usize,

    // Cleaning result; drained by deduplication
    pub cleaned: Vec<CleanRecord>,

    pub dedup: Option<DedupOutcome>,
    pub analysis: Option<AnalysisResult>,

    // Rendering result
    pub document: Option<DocumentRef>,
}

impl PipelineContext {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            raw: Vec::new(),
            total_rows: 0,
            cleaned: Vec::new(),
            dedup: None,
            analysis: None,
            document: None,
        }
    }

    /// Counts gathered so far.
    pub fn summary_stats(&self) -> SummaryStats {
        let (retained_items, removed_duplicates) = self
            .dedup
            .as_ref()
            .map(|d| (d.retained(), d.removed))
            .unwrap_or((0, 0));
        let (domestic_items, foreign_items) = self
            .analysis
            .as_ref()
            .map(|a| (a.domestic.len(), a.foreign.len()))
            .unwrap_or((0, 0));

        SummaryStats {
            total_items: self.total_rows,
            retained_items,
            removed_duplicates,
            domestic_items,
            foreign_items,
        }
    }
}
