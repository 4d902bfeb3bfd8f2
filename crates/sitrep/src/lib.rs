pub mod broadcast;
pub mod config;
pub mod error;
pub mod observer;
pub mod pipeline;
pub mod processor;
pub mod sanitize;
pub mod server;
pub mod service;
pub mod storage;
pub mod telemetry;
pub mod worker;

pub use broadcast::{
    HistoryCache, HistoryEntry, JobProgressBroadcaster, JobRecord, JobStatus, JobStore, Stage,
    StreamEvent, Subscription, SummaryStats,
};
pub use config::{load_config, load_with_env, Config};
pub use error::{
    ConfigError, ProcessError, Result, SitrepError, StorageError, StoreError, WorkerError,
};
pub use observer::{observe_job, ObservedOutcome};
pub use pipeline::{Pipeline, PipelineConfig, PipelineContext};
pub use server::SitrepServer;
pub use service::SitrepService;
