//! Job state, progress streaming and the completed-job history.
//!
//! The store owns job records, the broadcaster fans their snapshots out to
//! subscribers, and the history cache keeps summaries of finished jobs for
//! the observer side.

pub mod history;
pub mod job_progress;
pub mod job_store;

pub use history::{HistoryCache, HistoryEntry, SummaryStats, DEFAULT_HISTORY_CAPACITY};
pub use job_progress::{
    JobProgressBroadcaster, JobStatus, Stage, StepState, StreamEvent, Subscription,
};
pub use job_store::{JobCounts, JobRecord, JobStore, JobUpdate};
