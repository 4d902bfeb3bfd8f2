use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::broadcast::Stage;
use crate::processor::{
    Analyzer, AnalysisResult, MarkdownRenderer, RecordProcessor, Renderer, ReportInput,
    CsvRecordProcessor,
};
use crate::sanitize;
use crate::storage::{ArtifactStore, JobArtifacts};
use crate::worker::job::JobResult;

use super::config::PipelineConfig;
use super::context::PipelineContext;
use super::error::PipelineError;
use super::progress::{ProgressEvent, ProgressReporter};

pub struct Pipeline {
    config: Arc<PipelineConfig>,
    processor: Arc<dyn RecordProcessor>,
    analyzer: Arc<dyn Analyzer>,
    renderer: Arc<dyn Renderer>,
    artifacts: Arc<ArtifactStore>,
}

impl Pipeline {
    /// Production constructor with the CSV processor and Markdown renderer.
    pub fn from_config(
        config: Arc<PipelineConfig>,
        analyzer: Arc<dyn Analyzer>,
        artifacts: Arc<ArtifactStore>,
    ) -> Self {
        let renderer = MarkdownRenderer::new(&config.report_directory)
            .with_title(config.report_title.clone());
        Self {
            config,
            processor: Arc::new(CsvRecordProcessor::new()),
            analyzer,
            renderer: Arc::new(renderer),
            artifacts,
        }
    }

    /// Injects every collaborator.
    pub fn new(
        config: Arc<PipelineConfig>,
        processor: Arc<dyn RecordProcessor>,
        analyzer: Arc<dyn Analyzer>,
        renderer: Arc<dyn Renderer>,
        artifacts: Arc<ArtifactStore>,
    ) -> Self {
        Self {
            config,
            processor,
            analyzer,
            renderer,
            artifacts,
        }
    }

    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    /// Runs every stage for one job. Stops at the first failing stage.
    pub async fn run(
        &self,
        mut ctx: PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> (JobResult, PipelineContext) {
        let span = info_span!("pipeline",
            job_id = %ctx.job.id,
            filename = %sanitize::redact_path(&ctx.job.upload_path),
            analyzer = self.analyzer.name(),
        );

        let outcome = self.run_stages(&mut ctx, progress).instrument(span.clone()).await;
        let _entered = span.enter();

        match outcome {
            Ok(artifacts) => {
                let stats = artifacts.stats;
                let document_path = artifacts.document.path.clone();
                self.artifacts.record(artifacts);

                progress.report(ProgressEvent::Completed {
                    message: format!(
                        "Report ready: {} domestic, {} foreign items",
                        stats.domestic_items, stats.foreign_items
                    ),
                });
                info!(total = stats.total_items, retained = stats.retained_items, "job completed");
                (JobResult::success(&ctx.job, stats, document_path), ctx)
            }
            Err((stage, e)) => {
                let message = e.to_string();
                warn!(stage = %stage, error = %message, "job failed");
                progress.report(ProgressEvent::Failed {
                    error: message.clone(),
                });
                (JobResult::failure(&ctx.job, stage, message), ctx)
            }
        }
    }

    async fn run_stages(
        &self,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<JobArtifacts, (Stage, PipelineError)> {
        for stage in Stage::WORK {
            progress.report(ProgressEvent::StageEntered {
                stage,
                message: entering_message(stage).to_string(),
            });

            let span = info_span!("stage", job_id = %ctx.job.id, stage = %stage);
            let message = self
                .run_stage(stage, ctx)
                .instrument(span)
                .await
                .map_err(|e| (stage, e))?;

            progress.report(ProgressEvent::StageFinished { stage, message });
        }

        let document = ctx
            .document
            .clone()
            .ok_or((Stage::Rendering, PipelineError::MissingInput("rendering")))?;
        Ok(JobArtifacts {
            job_id: ctx.job.id.clone(),
            filename: ctx.job.filename.clone(),
            stats: ctx.summary_stats(),
            analysis: ctx.analysis.clone().unwrap_or_default(),
            document,
            created_at: ctx.job.created_at,
            completed_at: Utc::now(),
        })
    }

    /// Runs one stage and returns its result message.
    async fn run_stage(
        &self,
        stage: Stage,
        ctx: &mut PipelineContext,
    ) -> Result<String, PipelineError> {
        match stage {
            Stage::Intake => self.step_intake(ctx).await,
            Stage::Cleaning => self.step_clean(ctx),
            Stage::Deduplication => self.step_deduplicate(ctx),
            Stage::Analysis => self.step_analyze(ctx).await,
            Stage::Rendering => self.step_render(ctx).await,
            Stage::Completed | Stage::Error => Ok(String::new()),
        }
    }

    async fn step_intake(&self, ctx: &mut PipelineContext) -> Result<String, PipelineError> {
        let bytes = tokio::fs::read(&ctx.job.upload_path).await.map_err(|e| {
            crate::error::ProcessError::ReadUpload {
                path: ctx.job.upload_path.clone(),
                source: e,
            }
        })?;
        ctx.raw = self.processor.parse(&bytes)?;
        ctx.total_rows = ctx.raw.len();
        debug!(rows = ctx.total_rows, "upload parsed");
        Ok(format!("Read {} rows", ctx.total_rows))
    }

    fn step_clean(&self, ctx: &mut PipelineContext) -> Result<String, PipelineError> {
        let raw = std::mem::take(&mut ctx.raw);
        ctx.cleaned = self.processor.clean(raw)?;
        Ok(format!("Cleaned {} records", ctx.cleaned.len()))
    }

    fn step_deduplicate(&self, ctx: &mut PipelineContext) -> Result<String, PipelineError> {
        let cleaned = std::mem::take(&mut ctx.cleaned);
        let outcome = self.processor.deduplicate(cleaned);
        let message = format!(
            "Removed {} duplicates, {} records remain",
            outcome.removed,
            outcome.retained()
        );
        ctx.dedup = Some(outcome);
        Ok(message)
    }

    async fn step_analyze(&self, ctx: &mut PipelineContext) -> Result<String, PipelineError> {
        let records = ctx
            .dedup
            .as_ref()
            .map(|d| d.records.as_slice())
            .ok_or(PipelineError::MissingInput("analysis"))?;

        let timeout = self.config.analysis_timeout;
        let result = tokio::time::timeout(timeout, self.analyzer.analyze(records))
            .await
            .map_err(|_| PipelineError::AnalysisTimeout(timeout))??;

        let message = format!(
            "Classified {} domestic and {} foreign items",
            result.domestic.len(),
            result.foreign.len()
        );
        ctx.analysis = Some(result);
        Ok(message)
    }

    async fn step_render(&self, ctx: &mut PipelineContext) -> Result<String, PipelineError> {
        let input = ReportInput {
            job_id: ctx.job.id.clone(),
            filename: ctx.job.filename.clone(),
            generated_at: Utc::now(),
            stats: ctx.summary_stats(),
            analysis: ctx.analysis.clone().unwrap_or_else(AnalysisResult::default),
        };
        let document = self.renderer.render(&input).await?;
        let message = format!("Rendered {} bytes", document.size_bytes);
        ctx.document = Some(document);
        Ok(message)
    }
}

fn entering_message(stage: Stage) -> &'static str {
    match stage {
        Stage::Intake => "Reading upload...",
        Stage::Cleaning => "Cleaning records...",
        Stage::Deduplication => "Removing duplicate items...",
        Stage::Analysis => "Running analysis...",
        Stage::Rendering => "Rendering report...",
        Stage::Completed | Stage::Error => "",
    }
}
