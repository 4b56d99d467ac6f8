//! Serial pipeline: jobs run one at a time, in admission order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::{self, Event, EVENT_CHANNEL_SIZE};
use crate::job::{spawn_execute, Job, JobState};
use crate::{Scheduler, SchedulerError};

const QUERY_PIPELINE_STATE_TIMEOUT: Duration = Duration::from_secs(15);

/// Snapshot of `{job id → state}` for a queue scheduler. Each entry is
/// consistent on its own; the snapshot is not a single global instant.
#[derive(Debug, Clone)]
pub struct PipelineState {
    job_states: HashMap<Uuid, JobState>,
}

impl PipelineState {
    pub fn check(&self, id: Uuid) -> Result<JobState, SchedulerError> {
        self.job_states
            .get(&id)
            .copied()
            .ok_or(SchedulerError::JobNotFound(id))
    }

    pub fn len(&self) -> usize {
        self.job_states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.job_states.is_empty()
    }
}

/// Scheduler enforcing at most one running job and FIFO execution order.
///
/// Jobs may be admitted before `start`; they are retained in order and
/// the first one launches once the scheduler starts.
pub struct QueueScheduler {
    name: String,
    events: mpsc::Sender<Event>,
}

impl QueueScheduler {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

        let event_loop = EventLoop {
            jobs: Vec::new(),
            current: None,
            started: false,
            cancel: CancellationToken::new(),
            events: tx.clone(),
        };
        tokio::spawn(event_loop.run(rx));

        Self {
            name: name.into(),
            events: tx,
        }
    }

    /// Queries the pipeline for a state snapshot, waiting at most 15 s.
    pub async fn state(&self) -> Result<PipelineState, SchedulerError> {
        let (tx, rx) = oneshot::channel();
        event::post(&self.events, Event::QueryPipelineState { reply: tx })?;

        match tokio::time::timeout(QUERY_PIPELINE_STATE_TIMEOUT, rx).await {
            Err(_) => Err(SchedulerError::QueryPipelineTimeout),
            Ok(Err(_)) => Err(SchedulerError::Stopped),
            Ok(Ok(state)) => Ok(state),
        }
    }
}

#[async_trait]
impl Scheduler for QueueScheduler {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> Result<(), SchedulerError> {
        event::post(&self.events, Event::SchedulerStarted)
    }

    fn pause(&self) -> Result<(), SchedulerError> {
        event::post(&self.events, Event::SchedulerPaused)
    }

    async fn add(&self, job: Job) -> Result<(), SchedulerError> {
        event::post(
            &self.events,
            Event::JobAdded {
                job: Arc::new(job),
                reply: None,
            },
        )
    }
}

/// All mutable queue state. Owned by the single event-loop task; nothing
/// here needs a lock.
struct EventLoop {
    jobs: Vec<Arc<Job>>,
    /// Slot currently running or just finished. `None` until the first
    /// launch.
    current: Option<usize>,
    started: bool,
    cancel: CancellationToken,
    events: mpsc::Sender<Event>,
}

impl EventLoop {
    async fn run(mut self, mut rx: mpsc::Receiver<Event>) {
        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                event = rx.recv() => match event {
                    Some(event) => self.handle(event),
                    None => return,
                },
            }
        }
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::JobAdded { job, reply } => {
                job.mark_added();
                job.set_state(JobState::Queued);
                self.jobs.push(job);
                if let Some(reply) = reply {
                    let _ = reply.send(event::AdmitReply::Admitted);
                }
                self.drive();
            }

            Event::JobEnded => self.drive(),

            Event::SchedulerStarted => {
                self.started = true;
                self.drive();
            }

            Event::SchedulerPaused => {
                self.started = false;
                self.cancel.cancel();
            }

            Event::QueryPipelineState { reply } => {
                let job_states = self
                    .jobs
                    .iter()
                    .map(|job| (job.id(), job.state()))
                    .collect();
                let _ = reply.send(PipelineState { job_states });
            }
        }
    }

    /// Picks the next runnable slot, if any, and launches it.
    fn drive(&mut self) {
        if !self.started {
            return;
        }

        let slot = match self.current {
            Some(slot) => slot,
            None => {
                if self.jobs.is_empty() {
                    return;
                }
                self.current = Some(0);
                0
            }
        };

        match self.jobs[slot].state() {
            JobState::Running => {}
            JobState::Queued | JobState::NotStarted => self.launch(slot),
            JobState::Done | JobState::Failed => {
                let next = slot + 1;
                if next >= self.jobs.len() {
                    return;
                }
                self.current = Some(next);
                self.launch(next);
            }
        }
    }

    fn launch(&self, slot: usize) {
        let job = self.jobs[slot].clone();
        job.set_state(JobState::Running);
        spawn_execute(job, self.cancel.child_token(), self.events.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::sleep;

    fn sleeping_job(duration: Duration) -> Job {
        Job::new(move |_cancel| {
            Box::pin(async move {
                sleep(duration).await;
                Ok(())
            })
        })
    }

    fn failing_job() -> Job {
        Job::new(|_cancel| Box::pin(async { anyhow::bail!("unknown error") }))
    }

    async fn assert_state(queue: &QueueScheduler, id: Uuid, want: JobState) {
        let state = queue.state().await.expect("state query");
        assert_eq!(state.check(id).expect("job present"), want);
    }

    #[tokio::test]
    async fn runs_jobs_serially_in_admission_order() {
        let queue = QueueScheduler::new("handler-1");
        queue.start().expect("start");

        let timed = sleeping_job(Duration::from_millis(300));
        let quick = sleeping_job(Duration::from_millis(300));
        let failing = failing_job();
        let (timed_id, quick_id, failing_id) = (timed.id(), quick.id(), failing.id());

        queue.add(timed).await.expect("add timed");
        queue.add(quick).await.expect("add quick");
        queue.add(failing).await.expect("add failing");

        // t ≈ 100 ms: the first job is running, the rest wait.
        sleep(Duration::from_millis(100)).await;
        assert_state(&queue, timed_id, JobState::Running).await;
        assert_state(&queue, quick_id, JobState::Queued).await;
        assert_state(&queue, failing_id, JobState::Queued).await;

        // t ≈ 450 ms: the first finished at 300, the second is mid-run.
        sleep(Duration::from_millis(350)).await;
        assert_state(&queue, timed_id, JobState::Done).await;
        assert_state(&queue, quick_id, JobState::Running).await;
        assert_state(&queue, failing_id, JobState::Queued).await;

        // t ≈ 750 ms: everything has settled.
        sleep(Duration::from_millis(300)).await;
        assert_state(&queue, timed_id, JobState::Done).await;
        assert_state(&queue, quick_id, JobState::Done).await;
        assert_state(&queue, failing_id, JobState::Failed).await;
    }

    #[tokio::test]
    async fn state_has_one_entry_per_admitted_job() {
        let queue = QueueScheduler::new("handler-1");
        queue.start().expect("start");

        let mut ids = Vec::new();
        for _ in 0..4 {
            let job = sleeping_job(Duration::from_millis(10));
            ids.push(job.id());
            queue.add(job).await.expect("add");
        }

        let state = queue.state().await.expect("state query");
        assert_eq!(state.len(), ids.len());
        for id in ids {
            state.check(id).expect("entry per job");
        }
    }

    #[tokio::test]
    async fn single_job_runs_to_completion() {
        let queue = QueueScheduler::new("handler-1");
        queue.start().expect("start");

        let (tx, rx) = tokio::sync::oneshot::channel();
        let job = Job::new(move |_cancel| {
            Box::pin(async move {
                let _ = tx.send(());
                Ok(())
            })
        });

        queue.add(job).await.expect("add");

        tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("job ran")
            .expect("sender kept");
    }

    #[tokio::test]
    async fn jobs_added_before_start_run_after_start() {
        let queue = QueueScheduler::new("handler-1");

        let job = sleeping_job(Duration::from_millis(10));
        let id = job.id();
        queue.add(job).await.expect("add");

        assert_state(&queue, id, JobState::Queued).await;

        queue.start().expect("start");
        sleep(Duration::from_millis(100)).await;
        assert_state(&queue, id, JobState::Done).await;
    }

    #[tokio::test]
    async fn unknown_job_id_is_reported() {
        let queue = QueueScheduler::new("handler-1");
        queue.start().expect("start");

        let state = queue.state().await.expect("state query");
        let missing = Uuid::new_v4();
        assert!(matches!(
            state.check(missing),
            Err(SchedulerError::JobNotFound(id)) if id == missing
        ));
    }

    #[tokio::test]
    async fn pause_stops_the_event_loop() {
        let queue = QueueScheduler::new("handler-1");
        queue.start().expect("start");
        queue.pause().expect("pause");

        // The loop exits on cancellation; later calls see a closed channel.
        sleep(Duration::from_millis(50)).await;
        assert!(matches!(
            queue.add(sleeping_job(Duration::from_millis(1))).await,
            Err(SchedulerError::Stopped)
        ));
    }
}
