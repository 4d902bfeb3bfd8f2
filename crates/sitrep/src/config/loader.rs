use std::path::Path;

use crate::config::schema::{AnalysisBackend, Config};
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Loads the config file if given (defaults otherwise), applies process
/// environment overrides and validates the result.
pub fn load_with_env(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config)?;
    Ok(config)
}

/// Applies `SITREP_*` overrides read through `lookup`.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("SITREP_HOST") {
        config.server.host = host;
    }
    if let Some(port) = lookup("SITREP_PORT") {
        config.server.port = port.trim().parse().map_err(|e| ConfigError::InvalidEnv {
            name: "SITREP_PORT".to_string(),
            reason: format!("{}", e),
        })?;
    }
    if let Some(url) = lookup("SITREP_ANALYSIS_URL") {
        config.analysis.endpoint = Some(url);
        config.analysis.backend = AnalysisBackend::Workflow;
    }
    if let Some(key) = lookup("SITREP_ANALYSIS_API_KEY") {
        config.analysis.api_key = Some(key);
    }
    if let Some(level) = lookup("SITREP_LOG") {
        config.logging.level = level;
    }
    Ok(())
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let positive = [
        ("pipeline.max_concurrent_jobs", config.pipeline.max_concurrent_jobs as u64),
        ("pipeline.analysis_timeout_secs", config.pipeline.analysis_timeout_secs),
        ("stream.inactivity_timeout_secs", config.stream.inactivity_timeout_secs),
        ("stream.channel_capacity", config.stream.channel_capacity as u64),
        ("history.capacity", config.history.capacity as u64),
        ("storage.max_upload_bytes", config.storage.max_upload_bytes),
        ("storage.cleanup_interval_minutes", config.storage.cleanup_interval_minutes),
        ("analysis.request_timeout_secs", config.analysis.request_timeout_secs),
    ];
    for (name, value) in positive {
        if value == 0 {
            return Err(ConfigError::Validation {
                message: format!("{} must be greater than 0", name),
            });
        }
    }

    if config.storage.data_directory.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "storage.data_directory must not be empty".to_string(),
        });
    }

    if config.analysis.backend == AnalysisBackend::Workflow {
        match config.analysis.endpoint.as_deref() {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {}
            Some(url) => {
                return Err(ConfigError::Validation {
                    message: format!("analysis.endpoint is not an http(s) URL: {}", url),
                });
            }
            None => {
                return Err(ConfigError::Validation {
                    message: "analysis.endpoint is required for the workflow backend"
                        .to_string(),
                });
            }
        }
    }

    Ok(())
}
