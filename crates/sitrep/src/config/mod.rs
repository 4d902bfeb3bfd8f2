pub mod loader;
pub mod schema;

pub use loader::{apply_env_overrides, load_config, load_config_from_str, load_with_env, validate_config};
pub use schema::{
    AnalysisBackend, AnalysisConfig, Config, HistoryConfig, LoggingConfig, PipelineSettings,
    ServerConfig, StorageConfig, StreamConfig,
};
