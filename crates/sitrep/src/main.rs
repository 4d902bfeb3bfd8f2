//! sitrep CLI
//!
//! `sitrep serve` starts the HTTP API, `sitrep run <file>` processes one
//! upload locally and prints its progress.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};

use sitrep::broadcast::{HistoryCache, Stage, StreamEvent};
use sitrep::{
    load_with_env, observe_job, telemetry, Config, ObservedOutcome, Result, SitrepError,
    SitrepServer, SitrepService,
};

#[derive(Parser)]
#[command(name = "sitrep")]
#[command(about = "Turn public-opinion CSV exports into briefing reports", version)]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve,

    /// Process a single CSV file and print progress
    Run {
        /// CSV export to process
        file: PathBuf,
    },

    /// Show recently completed jobs
    History {
        /// Number of entries to show
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_with_env(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = telemetry::init_logging(&config.logging) {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Serve => runtime.block_on(serve_command(config)),
        Commands::Run { file } => runtime.block_on(run_command(config, &file)),
        Commands::History { limit } => history_command(&config, limit),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn serve_command(config: Config) -> Result<()> {
    tracing::info!("Starting sitrep v{}", env!("CARGO_PKG_VERSION"));
    let service = Arc::new(SitrepService::new(config)?);
    SitrepServer::new(service).start().await
}

async fn run_command(config: Config, file: &Path) -> Result<()> {
    let bytes = tokio::fs::read(file).await?;
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    let history_path = config.storage.history_path();
    let history = Mutex::new(HistoryCache::load(&history_path, config.history.capacity)?);
    let inactivity = std::time::Duration::from_secs(config.stream.inactivity_timeout_secs);

    let service = SitrepService::new(config)?;
    let job_id = service.submit_upload(&filename, &bytes)?;
    println!("Job {} accepted", job_id);

    let outcome = observe_job(&service, &job_id, &history, print_event).await?;
    service.shutdown();

    match outcome {
        ObservedOutcome::Completed(entry) => {
            let cache = match history.into_inner() {
                Ok(cache) => cache,
                Err(poisoned) => poisoned.into_inner(),
            };
            cache.save(&history_path)?;

            let document = service.document(&job_id)?;
            let stats = &entry.summary_stats;
            println!(
                "Done: {} of {} items kept ({} duplicates removed, {} domestic, {} foreign)",
                stats.retained_items,
                stats.total_items,
                stats.removed_duplicates,
                stats.domestic_items,
                stats.foreign_items
            );
            println!("Report: {}", document.path.display());
            Ok(())
        }
        ObservedOutcome::Failed { error_detail } => {
            let stage = service
                .status(&job_id)
                .ok()
                .and_then(|record| record.failed_stage)
                .unwrap_or(Stage::Intake);
            Err(SitrepError::StageFailure {
                stage,
                message: error_detail,
            })
        }
        ObservedOutcome::TimedOut => Err(SitrepError::SubscriptionTimeout {
            job_id,
            after: inactivity,
        }),
        ObservedOutcome::Disconnected => Err(SitrepError::Worker(
            sitrep::WorkerError::ShutDown,
        )),
    }
}

fn history_command(config: &Config, limit: usize) -> Result<()> {
    let cache = HistoryCache::load(&config.storage.history_path(), config.history.capacity)?;
    if cache.is_empty() {
        println!("No completed jobs yet");
        return Ok(());
    }
    for entry in cache.list(limit) {
        println!(
            "{:>4}  {}  {}  {}  {} items",
            entry.id,
            entry.completed_at.format("%Y-%m-%d %H:%M"),
            entry.job_id,
            entry.filename,
            entry.summary_stats.retained_items
        );
    }
    Ok(())
}

fn print_event(event: &StreamEvent) {
    match event {
        StreamEvent::Connected { job_id } => println!("Connected to job {}", job_id),
        StreamEvent::Progress { job } => {
            let message = job.message.as_deref().unwrap_or("");
            println!("[{:>3}%] {:<14} {}", job.progress, job.stage, message);
        }
        StreamEvent::Error { error_detail, .. } => eprintln!("Job failed: {}", error_detail),
        StreamEvent::Timeout { message, .. } => eprintln!("{}", message),
        StreamEvent::Finished { status, .. } => println!("Finished: {:?}", status),
    }
}
