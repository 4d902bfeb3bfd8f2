//! Job progress broadcaster for real-time job status streaming.
//!
//! Every job gets its own bounded broadcast channel carrying full
//! [`JobRecord`] snapshots. A [`Subscription`] turns those snapshots into the
//! event vocabulary consumed by observers (`connected`, `progress`, `error`,
//! `timeout`, `finished`).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::broadcast::job_store::JobRecord;

/// Default inactivity window for a subscription.
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(300);

/// Stage of job processing.
///
/// Work stages run in declaration order; `Error` is reachable from any
/// non-terminal stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Intake,
    Cleaning,
    Deduplication,
    Analysis,
    Rendering,
    Completed,
    Error,
}

impl Stage {
    /// The stages that perform work, in execution order.
    pub const WORK: [Stage; 5] = [
        Stage::Intake,
        Stage::Cleaning,
        Stage::Deduplication,
        Stage::Analysis,
        Stage::Rendering,
    ];

    /// Returns the stage that follows this one on success.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Intake => Some(Stage::Cleaning),
            Stage::Cleaning => Some(Stage::Deduplication),
            Stage::Deduplication => Some(Stage::Analysis),
            Stage::Analysis => Some(Stage::Rendering),
            Stage::Rendering => Some(Stage::Completed),
            Stage::Completed | Stage::Error => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Error)
    }

    /// Transition table. A stage may stay where it is, advance to its
    /// successor, or fall into `Error`. Terminal stages have no edges.
    pub fn can_transition_to(self, to: Stage) -> bool {
        use Stage::*;

        match (self, to) {
            (Completed, _) | (Error, _) => false,
            (_, Error) => true,
            (Intake, Intake | Cleaning)
            | (Cleaning, Cleaning | Deduplication)
            | (Deduplication, Deduplication | Analysis)
            | (Analysis, Analysis | Rendering)
            | (Rendering, Rendering | Completed) => true,
            _ => false,
        }
    }

    /// Progress `(floor, ceiling)` owned by a work stage.
    pub fn progress_window(self) -> Option<(u8, u8)> {
        match self {
            Stage::Intake => Some((0, 10)),
            Stage::Cleaning => Some((10, 30)),
            Stage::Deduplication => Some((30, 50)),
            Stage::Analysis => Some((50, 85)),
            Stage::Rendering => Some((85, 100)),
            Stage::Completed | Stage::Error => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Intake => "intake",
            Stage::Cleaning => "cleaning",
            Stage::Deduplication => "deduplication",
            Stage::Analysis => "analysis",
            Stage::Rendering => "rendering",
            Stage::Completed => "completed",
            Stage::Error => "error",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Status of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Per-step display state derived from a job record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Waiting,
    Active,
    Done,
    Failed,
}

/// Event delivered to a subscriber.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    /// First event of every subscription.
    Connected { job_id: String },
    /// Full snapshot after a store merge.
    Progress { job: JobRecord },
    /// The job failed.
    Error { job_id: String, error_detail: String },
    /// No event arrived within the inactivity window.
    Timeout { job_id: String, message: String },
    /// The job reached a terminal status. Always the last event.
    Finished { job_id: String, status: JobStatus },
}

impl StreamEvent {
    /// Event name used on the wire (SSE `event:` field).
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Connected { .. } => "connected",
            StreamEvent::Progress { .. } => "progress",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Timeout { .. } => "timeout",
            StreamEvent::Finished { .. } => "finished",
        }
    }
}

struct BroadcasterInner {
    channels: RwLock<HashMap<String, broadcast::Sender<JobRecord>>>,
    capacity: usize,
    inactivity_timeout: Duration,
}

/// Fans job record snapshots out to per-job subscribers.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    inner: Arc<BroadcasterInner>,
}

impl JobProgressBroadcaster {
    /// Creates a broadcaster whose per-job channels hold `capacity` snapshots.
    pub fn new(capacity: usize, inactivity_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(BroadcasterInner {
                channels: RwLock::new(HashMap::new()),
                capacity: capacity.max(1),
                inactivity_timeout,
            }),
        }
    }

    pub fn inactivity_timeout(&self) -> Duration {
        self.inner.inactivity_timeout
    }

    /// Opens the channel for a job. Opening twice keeps the existing channel.
    pub fn open(&self, job_id: &str) {
        let mut channels = match self.inner.channels.write() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Broadcaster channel lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        channels
            .entry(job_id.to_string())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0);
    }

    /// Sends a snapshot to every subscriber of its job.
    pub fn publish(&self, record: &JobRecord) {
        let channels = match self.inner.channels.read() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Broadcaster channel lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        if let Some(sender) = channels.get(&record.job_id) {
            // Ignore errors - no active receivers is fine
            let _ = sender.send(record.clone());
        }
    }

    /// Closes a job's channel. Subscribers drain what was already sent.
    pub fn close(&self, job_id: &str) {
        let removed = match self.inner.channels.write() {
            Ok(mut g) => g.remove(job_id),
            Err(poisoned) => {
                log::warn!("Broadcaster channel lock was poisoned, recovering");
                poisoned.into_inner().remove(job_id)
            }
        };
        if removed.is_some() {
            log::debug!("Closed progress channel for job {}", job_id);
        }
    }

    /// Number of live subscribers for a job.
    pub fn subscriber_count(&self, job_id: &str) -> usize {
        self.inner
            .channels
            .read()
            .ok()
            .and_then(|channels| channels.get(job_id).map(|s| s.receiver_count()))
            .unwrap_or(0)
    }

    /// Number of jobs with an open channel.
    pub fn open_channels(&self) -> usize {
        self.inner.channels.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Attaches a subscriber given the job's state at attach time.
    ///
    /// Callers must hold the job's store lock so that no snapshot falls
    /// between `current` and the new receiver.
    pub fn attach(&self, current: &JobRecord) -> Subscription {
        let mut subscription = Subscription {
            job_id: current.job_id.clone(),
            receiver: None,
            pending: VecDeque::new(),
            inactivity_timeout: self.inner.inactivity_timeout,
            done: false,
        };
        subscription.pending.push_back(StreamEvent::Connected {
            job_id: current.job_id.clone(),
        });

        if current.status.is_terminal() {
            subscription.push_terminal(current, false);
            return subscription;
        }

        subscription.receiver = self
            .inner
            .channels
            .read()
            .ok()
            .and_then(|channels| channels.get(&current.job_id).map(|s| s.subscribe()));
        if subscription.receiver.is_none() {
            log::warn!(
                "Job {} is not terminal but has no open progress channel",
                current.job_id
            );
        }
        subscription
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(64, DEFAULT_INACTIVITY_TIMEOUT)
    }
}

/// A single consumer's view of one job's event stream.
///
/// Dropping the subscription releases its receiver; the job is unaffected.
pub struct Subscription {
    job_id: String,
    receiver: Option<broadcast::Receiver<JobRecord>>,
    pending: VecDeque<StreamEvent>,
    inactivity_timeout: Duration,
    done: bool,
}

impl Subscription {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Overrides the inactivity window for this subscription only.
    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    /// Waits for the next event. Returns `None` once the stream has ended.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.done {
                return None;
            }
            let Some(receiver) = self.receiver.as_mut() else {
                self.done = true;
                return None;
            };

            match tokio::time::timeout(self.inactivity_timeout, receiver.recv()).await {
                Ok(Ok(record)) => self.push_snapshot(record),
                Ok(Err(RecvError::Lagged(missed))) => {
                    log::warn!(
                        "Subscriber for job {} lagged, skipped {} snapshots",
                        self.job_id,
                        missed
                    );
                }
                Ok(Err(RecvError::Closed)) => {
                    log::debug!(
                        "Progress channel for job {} closed before a terminal state",
                        self.job_id
                    );
                    self.end();
                }
                Err(_) => {
                    self.end();
                    return Some(StreamEvent::Timeout {
                        job_id: self.job_id.clone(),
                        message: format!("No progress within {:?}", self.inactivity_timeout),
                    });
                }
            }
        }
    }

    /// Converts the subscription into a stream of events.
    pub fn into_stream(self) -> impl Stream<Item = StreamEvent> + Send + 'static {
        futures_util::stream::unfold(self, |mut subscription| async move {
            subscription
                .next_event()
                .await
                .map(|event| (event, subscription))
        })
    }

    fn push_snapshot(&mut self, record: JobRecord) {
        match record.status {
            JobStatus::Completed | JobStatus::Failed => self.push_terminal(&record, true),
            JobStatus::Pending | JobStatus::Running => {
                self.pending.push_back(StreamEvent::Progress { job: record });
            }
        }
    }

    /// Queues the closing events. Snapshots already seen at attach time are
    /// not repeated as `progress`.
    fn push_terminal(&mut self, record: &JobRecord, live: bool) {
        if record.status == JobStatus::Failed {
            self.pending.push_back(StreamEvent::Error {
                job_id: record.job_id.clone(),
                error_detail: record
                    .error_detail
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            });
        } else if live {
            self.pending.push_back(StreamEvent::Progress {
                job: record.clone(),
            });
        }
        self.pending.push_back(StreamEvent::Finished {
            job_id: record.job_id.clone(),
            status: record.status,
        });
        self.end();
    }

    fn end(&mut self) {
        self.done = true;
        self.receiver = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(job_id: &str, stage: Stage, status: JobStatus, progress: u8) -> JobRecord {
        let now = Utc::now();
        JobRecord {
            job_id: job_id.to_string(),
            filename: "export.csv".to_string(),
            stage,
            status,
            progress,
            message: None,
            error_detail: None,
            failed_stage: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_stage_order_and_terminal() {
        let mut stage = Stage::Intake;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            seen.push(next);
            stage = next;
        }
        assert_eq!(
            seen,
            vec![
                Stage::Intake,
                Stage::Cleaning,
                Stage::Deduplication,
                Stage::Analysis,
                Stage::Rendering,
                Stage::Completed,
            ]
        );
        assert!(Stage::Completed.is_terminal());
        assert!(Stage::Error.is_terminal());
        assert!(!Stage::Analysis.is_terminal());
    }

    #[test]
    fn test_transition_table() {
        assert!(Stage::Intake.can_transition_to(Stage::Cleaning));
        assert!(Stage::Analysis.can_transition_to(Stage::Analysis));
        assert!(Stage::Rendering.can_transition_to(Stage::Completed));
        assert!(!Stage::Intake.can_transition_to(Stage::Analysis));
        assert!(!Stage::Rendering.can_transition_to(Stage::Cleaning));
        assert!(!Stage::Completed.can_transition_to(Stage::Error));
        assert!(!Stage::Error.can_transition_to(Stage::Intake));

        for stage in Stage::WORK {
            assert!(stage.can_transition_to(Stage::Error));
        }
    }

    #[test]
    fn test_progress_windows_are_contiguous() {
        let mut previous_ceiling = 0;
        for stage in Stage::WORK {
            let (floor, ceiling) = stage.progress_window().unwrap();
            assert_eq!(floor, previous_ceiling);
            assert!(ceiling > floor);
            previous_ceiling = ceiling;
        }
        assert_eq!(previous_ceiling, 100);
        assert!(Stage::Error.progress_window().is_none());
    }

    #[test]
    fn test_stream_event_serialization() {
        let event = StreamEvent::Error {
            job_id: "job-1".to_string(),
            error_detail: "boom".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["jobId"], "job-1");
        assert_eq!(json["errorDetail"], "boom");
        assert_eq!(event.kind(), "error");
    }

    #[tokio::test]
    async fn test_subscription_delivers_in_publish_order() {
        let broadcaster = JobProgressBroadcaster::default();
        broadcaster.open("job-1");
        let mut sub = broadcaster.attach(&record("job-1", Stage::Intake, JobStatus::Pending, 0));

        broadcaster.publish(&record("job-1", Stage::Intake, JobStatus::Running, 0));
        broadcaster.publish(&record("job-1", Stage::Cleaning, JobStatus::Running, 10));
        broadcaster.publish(&record("job-1", Stage::Completed, JobStatus::Completed, 100));

        assert!(matches!(
            sub.next_event().await,
            Some(StreamEvent::Connected { .. })
        ));
        let mut progress = vec![];
        while let Some(event) = sub.next_event().await {
            match event {
                StreamEvent::Progress { job } => progress.push(job.progress),
                StreamEvent::Finished { status, .. } => {
                    assert_eq!(status, JobStatus::Completed);
                    break;
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert_eq!(progress, vec![0, 10, 100]);
        assert!(sub.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_snapshot_emits_error_then_finished() {
        let broadcaster = JobProgressBroadcaster::default();
        broadcaster.open("job-2");
        let mut sub = broadcaster.attach(&record("job-2", Stage::Analysis, JobStatus::Running, 50));

        let mut failed = record("job-2", Stage::Error, JobStatus::Failed, 50);
        failed.error_detail = Some("analysis timed out".to_string());
        broadcaster.publish(&failed);

        let _connected = sub.next_event().await;
        assert_eq!(
            sub.next_event().await,
            Some(StreamEvent::Error {
                job_id: "job-2".to_string(),
                error_detail: "analysis timed out".to_string(),
            })
        );
        assert_eq!(
            sub.next_event().await,
            Some(StreamEvent::Finished {
                job_id: "job-2".to_string(),
                status: JobStatus::Failed,
            })
        );
        assert!(sub.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_attach_to_terminal_job_finishes_immediately() {
        let broadcaster = JobProgressBroadcaster::default();
        let done = record("job-3", Stage::Completed, JobStatus::Completed, 100);
        let mut sub = broadcaster.attach(&done);

        let kinds: Vec<&str> = {
            let mut kinds = vec![];
            while let Some(event) = sub.next_event().await {
                kinds.push(event.kind());
            }
            kinds
        };
        assert_eq!(kinds, vec!["connected", "finished"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactivity_timeout_closes_subscription() {
        let broadcaster = JobProgressBroadcaster::new(8, Duration::from_secs(5));
        broadcaster.open("job-4");
        let mut sub = broadcaster.attach(&record("job-4", Stage::Analysis, JobStatus::Running, 50));

        let _connected = sub.next_event().await;
        let event = sub.next_event().await;
        assert!(matches!(event, Some(StreamEvent::Timeout { .. })));
        assert!(sub.next_event().await.is_none());
        // The channel itself stays open for other subscribers.
        assert_eq!(broadcaster.open_channels(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_message_keeps_subsecond_window() {
        let broadcaster = JobProgressBroadcaster::new(8, Duration::from_secs(5));
        broadcaster.open("job-7");
        let mut sub = broadcaster
            .attach(&record("job-7", Stage::Analysis, JobStatus::Running, 50))
            .with_inactivity_timeout(Duration::from_millis(50));

        let _connected = sub.next_event().await;
        match sub.next_event().await {
            Some(StreamEvent::Timeout { message, .. }) => {
                assert_eq!(message, "No progress within 50ms")
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_to_latest_snapshot() {
        let broadcaster = JobProgressBroadcaster::new(1, Duration::from_secs(5));
        broadcaster.open("job-8");
        let mut sub = broadcaster.attach(&record("job-8", Stage::Intake, JobStatus::Pending, 0));

        // Nobody reads while these are published; publish must not wait.
        broadcaster.publish(&record("job-8", Stage::Intake, JobStatus::Running, 0));
        broadcaster.publish(&record("job-8", Stage::Cleaning, JobStatus::Running, 10));
        broadcaster.publish(&record("job-8", Stage::Deduplication, JobStatus::Running, 30));
        broadcaster.publish(&record("job-8", Stage::Analysis, JobStatus::Running, 50));
        broadcaster.publish(&record("job-8", Stage::Completed, JobStatus::Completed, 100));

        let mut events = vec![];
        while let Some(event) = sub.next_event().await {
            events.push(event);
        }
        let kinds: Vec<&str> = events.iter().map(StreamEvent::kind).collect();
        assert_eq!(kinds, vec!["connected", "progress", "finished"]);
        assert!(matches!(
            &events[1],
            StreamEvent::Progress { job } if job.progress == 100 && job.stage == Stage::Completed
        ));
    }

    #[tokio::test]
    async fn test_dropping_subscription_releases_receiver() {
        let broadcaster = JobProgressBroadcaster::default();
        broadcaster.open("job-5");
        let sub = broadcaster.attach(&record("job-5", Stage::Intake, JobStatus::Pending, 0));
        assert_eq!(broadcaster.subscriber_count("job-5"), 1);

        drop(sub);
        assert_eq!(broadcaster.subscriber_count("job-5"), 0);
        // Publishing with no receivers is fine.
        broadcaster.publish(&record("job-5", Stage::Intake, JobStatus::Running, 0));
    }

    #[tokio::test]
    async fn test_close_without_terminal_ends_stream() {
        let broadcaster = JobProgressBroadcaster::default();
        broadcaster.open("job-6");
        let mut sub = broadcaster.attach(&record("job-6", Stage::Intake, JobStatus::Running, 0));
        broadcaster.close("job-6");

        assert!(matches!(
            sub.next_event().await,
            Some(StreamEvent::Connected { .. })
        ));
        assert!(sub.next_event().await.is_none());
    }
}
