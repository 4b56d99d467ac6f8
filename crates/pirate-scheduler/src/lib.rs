//! Job scheduling for the pirate webhook dispatcher.
//!
//! Each configured endpoint owns one scheduler. A scheduler is an
//! admission-control policy in front of a single-consumer event loop:
//! all mutable scheduler state lives on that loop task, and the public
//! surface only posts events into a bounded channel. Three policies are
//! provided: [`QueueScheduler`] (serial, FIFO), [`ParallelScheduler`]
//! (immediate fan-out) and [`DropScheduler`] (at-most-one, reject the
//! rest).

pub mod drop;
pub mod event;
pub mod job;
pub mod parallel;
pub mod queue;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub use drop::DropScheduler;
pub use job::{Job, JobFn, JobState};
pub use parallel::ParallelScheduler;
pub use queue::{PipelineState, QueueScheduler};

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The drop policy rejected the admission because a job is running.
    #[error("job dropped")]
    JobDropped,

    /// The scheduler has not been started yet.
    #[error("scheduler is not started")]
    NotStarted,

    /// The event channel is full; the caller should back off.
    #[error("event channel is full")]
    Backpressure,

    /// The event loop has exited (the scheduler was paused).
    #[error("scheduler is stopped")]
    Stopped,

    #[error("timed out waiting for admission response")]
    AdmitTimeout,

    #[error("timed out waiting for pipeline state")]
    QueryPipelineTimeout,

    #[error("job with id '{0}' not found")]
    JobNotFound(Uuid),
}

/// Admission control for a single endpoint.
///
/// `start` and `pause` post lifecycle events; `add` submits a job for
/// execution. None of them block on job completion. `pause` cancels the
/// scheduler's root cancellation token exactly once, which propagates to
/// every in-flight job, and permanently stops the event loop.
#[async_trait]
pub trait Scheduler: Send + Sync {
    fn name(&self) -> &str;

    fn start(&self) -> Result<(), SchedulerError>;

    fn pause(&self) -> Result<(), SchedulerError>;

    async fn add(&self, job: Job) -> Result<(), SchedulerError>;
}
