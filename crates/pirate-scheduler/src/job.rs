//! Jobs: one-shot deferred executions with identity and state.

use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;
use uuid::Uuid;

use crate::event::Event;

/// The payload of a job. Receives a cancellation token owned by the
/// scheduler that admitted the job; cancelling it must abort the work.
pub type JobFn = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Lifecycle of a job. Transitions follow
/// `not-started → queued → running → {done | failed}`; the two terminal
/// states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    NotStarted,
    Queued,
    Running,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::NotStarted => "not-started",
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A unit of work admitted into a scheduler.
pub struct Job {
    id: Uuid,
    state: Mutex<JobState>,
    func: Mutex<Option<JobFn>>,
    time_created: DateTime<Utc>,
    time_added: OnceLock<DateTime<Utc>>,
}

impl Job {
    pub fn new<F>(func: F) -> Self
    where
        F: FnOnce(CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send + 'static,
    {
        Self {
            id: Uuid::new_v4(),
            state: Mutex::new(JobState::NotStarted),
            func: Mutex::new(Some(Box::new(func))),
            time_created: Utc::now(),
            time_added: OnceLock::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> JobState {
        *self.state.lock().expect("job state lock poisoned")
    }

    /// Records a state transition. Writes that would leave a terminal
    /// state are ignored.
    pub fn set_state(&self, state: JobState) {
        let mut guard = self.state.lock().expect("job state lock poisoned");
        if guard.is_terminal() {
            return;
        }
        *guard = state;
    }

    pub fn time_created(&self) -> DateTime<Utc> {
        self.time_created
    }

    /// The admission timestamp, if the job has been admitted.
    pub fn time_added(&self) -> Option<DateTime<Utc>> {
        self.time_added.get().copied()
    }

    /// Stamps the admission time. Only the first call has an effect.
    pub(crate) fn mark_added(&self) {
        let _ = self.time_added.set(Utc::now());
    }

    pub(crate) fn take_func(&self) -> Option<JobFn> {
        self.func.lock().expect("job func lock poisoned").take()
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Runs a job on its own task. The terminal state is written before
/// `JobEnded` is posted, so the event loop and any state snapshot observe
/// a settled job when they learn it ended.
pub(crate) fn spawn_execute(job: Arc<Job>, cancel: CancellationToken, events: mpsc::Sender<Event>) {
    tokio::spawn(async move {
        let result = match job.take_func() {
            Some(func) => func(cancel).await,
            None => Ok(()),
        };

        match result {
            Ok(()) => job.set_state(JobState::Done),
            Err(err) => {
                error!(job_id = %job.id(), error = %err, "Job failed");
                job.set_state(JobState::Failed);
            }
        }

        // The loop may already be gone after a pause; nothing to do then.
        let _ = events.send(Event::JobEnded).await;
    });
}
