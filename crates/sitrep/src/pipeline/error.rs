use std::time::Duration;

use thiserror::Error;

/// Reasons a stage can fail. The display text becomes the job's error detail.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{0}")]
    Processing(#[from] crate::error::ProcessError),

    #[error("analysis timed out after {}s", .0.as_secs())]
    AnalysisTimeout(Duration),

    #[error("stage '{0}' ran without its input")]
    MissingInput(&'static str),
}
