use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;

pub struct PipelineConfig {
    pub report_directory: PathBuf,
    /// Upper bound for one analysis call.
    pub analysis_timeout: Duration,
    pub report_title: String,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            report_directory: config.storage.report_directory(),
            analysis_timeout: Duration::from_secs(config.pipeline.analysis_timeout_secs),
            report_title: config.pipeline.report_title.clone(),
        }
    }
}
