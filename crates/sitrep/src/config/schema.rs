use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            pipeline: PipelineSettings::default(),
            stream: StreamConfig::default(),
            analysis: AnalysisConfig::default(),
            history: HistoryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origins. `*` allows any origin.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_data_directory")]
    pub data_directory: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Uploads and reports older than this are removed by the sweeper.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_minutes: u64,
}

fn default_data_directory() -> String {
    dirs::data_local_dir()
        .map(|d| d.join("sitrep"))
        .unwrap_or_else(|| PathBuf::from(".sitrep"))
        .to_string_lossy()
        .to_string()
}

fn default_max_upload_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_retention_hours() -> u64 {
    24
}

fn default_cleanup_interval() -> u64 {
    60
}

impl StorageConfig {
    pub fn data_directory(&self) -> PathBuf {
        PathBuf::from(&self.data_directory)
    }

    pub fn upload_directory(&self) -> PathBuf {
        self.data_directory().join("uploads")
    }

    pub fn report_directory(&self) -> PathBuf {
        self.data_directory().join("reports")
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_directory().join("history.json")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_directory: default_data_directory(),
            max_upload_bytes: default_max_upload_bytes(),
            retention_hours: default_retention_hours(),
            cleanup_interval_minutes: default_cleanup_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineSettings {
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_analysis_timeout")]
    pub analysis_timeout_secs: u64,
    #[serde(default = "default_report_title")]
    pub report_title: String,
}

fn default_max_concurrent_jobs() -> usize {
    num_cpus::get()
}

fn default_analysis_timeout() -> u64 {
    600
}

fn default_report_title() -> String {
    "Media Monitoring Report".to_string()
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            analysis_timeout_secs: default_analysis_timeout(),
            report_title: default_report_title(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamConfig {
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_secs: u64,
    /// Snapshots buffered per job before slow subscribers start lagging.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_inactivity_timeout() -> u64 {
    300
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: default_inactivity_timeout(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisBackend {
    /// Classify locally by the language column.
    #[default]
    Language,
    /// Call a remote workflow endpoint.
    Workflow,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub backend: AnalysisBackend,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    600
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            backend: AnalysisBackend::default(),
            endpoint: None,
            api_key: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryConfig {
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

fn default_history_capacity() -> usize {
    crate::broadcast::DEFAULT_HISTORY_CAPACITY
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `sitrep=debug,tower_http=info`.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
