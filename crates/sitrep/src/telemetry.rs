//! Logging setup for the binary.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::ConfigError;

/// Builds the filter: `RUST_LOG` wins over the configured level.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| ConfigError::Validation {
        message: format!("invalid logging.level '{}': {}", config.level, e),
    })
}

/// Installs the global subscriber and routes `log` records into it.
///
/// Call once, before the service starts.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = env_filter(config)?;

    if let Err(e) = tracing_log::LogTracer::init() {
        // Another logger is already installed; keep going with tracing only.
        eprintln!("log bridge not installed: {}", e);
    }

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };

    installed.map_err(|e| ConfigError::Validation {
        message: format!("failed to install log subscriber: {}", e),
    })
}
