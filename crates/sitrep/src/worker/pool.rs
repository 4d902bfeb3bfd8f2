use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info};
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinHandle};

use crate::broadcast::{JobStore, Stage};
use crate::error::WorkerError;
use crate::pipeline::progress::{ProgressEvent, ProgressReporter, StoreProgress};
use crate::pipeline::{Pipeline, PipelineContext};
use crate::worker::job::{Job, JobResult};

/// Closes the job's progress channel when the task ends, including on abort.
struct ChannelGuard {
    store: Arc<JobStore>,
    job_id: String,
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        self.store.close(&self.job_id);
    }
}

/// Runs one tokio task per job, at most `max_concurrent_jobs` at a time.
pub struct WorkerPool {
    pipeline: Arc<Pipeline>,
    store: Arc<JobStore>,
    permits: Arc<Semaphore>,
    tasks: Mutex<HashMap<String, AbortHandle>>,
    shutdown: AtomicBool,
}

impl WorkerPool {
    pub fn new(pipeline: Arc<Pipeline>, store: Arc<JobStore>, max_concurrent_jobs: usize) -> Self {
        let max_concurrent_jobs = max_concurrent_jobs.max(1);
        info!("Worker pool accepts {} concurrent jobs", max_concurrent_jobs);
        Self {
            pipeline,
            store,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs)),
            tasks: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Spawns the job. It stays `pending` until a permit is free.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, job: Job) -> Result<JoinHandle<JobResult>, WorkerError> {
        if self.is_shutdown() {
            return Err(WorkerError::ShutDown);
        }

        let job_id = job.id.clone();
        let pipeline = Arc::clone(&self.pipeline);
        let store = Arc::clone(&self.store);
        let permits = Arc::clone(&self.permits);

        // Owned by the future, so an abort before the first poll still closes the channel.
        let guard = ChannelGuard {
            store: Arc::clone(&store),
            job_id: job.id.clone(),
        };

        let handle = tokio::spawn(async move {
            let _guard = guard;
            let progress = StoreProgress::new(store, &job.id);

            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    let error = WorkerError::ShutDown.to_string();
                    progress.report(ProgressEvent::Failed {
                        error: error.clone(),
                    });
                    return JobResult::failure(&job, Stage::Intake, error);
                }
            };

            debug!("Processing job {}", job.id);
            let (result, _ctx) = pipeline.run(PipelineContext::new(job), &progress).await;
            result
        });

        let mut tasks = self.lock_tasks();
        tasks.retain(|_, task| !task.is_finished());
        tasks.insert(job_id, handle.abort_handle());
        Ok(handle)
    }

    /// Number of submitted jobs whose task has not finished.
    pub fn active_jobs(&self) -> usize {
        self.lock_tasks()
            .values()
            .filter(|task| !task.is_finished())
            .count()
    }

    /// Stops accepting jobs and aborts every running or waiting job task.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down worker pool...");
        self.permits.close();

        let tasks: Vec<(String, AbortHandle)> = self.lock_tasks().drain().collect();
        for (job_id, task) in tasks {
            if !task.is_finished() {
                debug!("Aborting job {}", job_id);
                task.abort();
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, HashMap<String, AbortHandle>> {
        match self.tasks.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Worker task map lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
