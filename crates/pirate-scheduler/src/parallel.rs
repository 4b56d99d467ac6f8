//! Fan-out policy: every admitted job launches immediately.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::event::{self, AdmitReply, Event, EVENT_CHANNEL_SIZE};
use crate::job::{spawn_execute, Job, JobState};
use crate::{Scheduler, SchedulerError};

/// Scheduler with no retention and no ordering: an admitted job runs on
/// its own task right away. Admissions to a scheduler that is not started
/// are rejected with [`SchedulerError::NotStarted`].
pub struct ParallelScheduler {
    name: String,
    events: mpsc::Sender<Event>,
}

impl ParallelScheduler {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

        let event_loop = EventLoop {
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
}

#[async_trait]
impl Scheduler for ParallelScheduler {
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
        let (tx, rx) = oneshot::channel();
        event::post(
            &self.events,
            Event::JobAdded {
                job: Arc::new(job),
                reply: Some(tx),
            },
        )?;

        event::await_admit_reply(rx).await
    }
}

struct EventLoop {
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
                if !self.started {
                    if let Some(reply) = reply {
                        let _ = reply.send(AdmitReply::NotStarted);
                    }
                    return;
                }

                job.mark_added();
                job.set_state(JobState::Queued);
                if let Some(reply) = reply {
                    let _ = reply.send(AdmitReply::Admitted);
                }

                job.set_state(JobState::Running);
                spawn_execute(job, self.cancel.child_token(), self.events.clone());
            }

            Event::JobEnded => {}

            Event::SchedulerStarted => self.started = true,

            Event::SchedulerPaused => {
                self.started = false;
                self.cancel.cancel();
            }

            Event::QueryPipelineState { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::{sleep, Instant};

    #[tokio::test]
    async fn fans_out_all_jobs_at_once() {
        let parallel = ParallelScheduler::new("test-handler");
        parallel.start().expect("start");

        const JOB_COUNT: usize = 5;
        const JOB_DURATION: Duration = Duration::from_millis(500);

        let remaining = Arc::new(AtomicUsize::new(JOB_COUNT));
        let (done_tx, mut done_rx) = mpsc::channel(1);

        let started = Instant::now();
        for _ in 0..JOB_COUNT {
            let remaining = remaining.clone();
            let done_tx = done_tx.clone();
            let job = Job::new(move |_cancel| {
                Box::pin(async move {
                    sleep(JOB_DURATION).await;
                    if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                        let _ = done_tx.send(()).await;
                    }
                    Ok(())
                })
            });

            parallel.add(job).await.expect("add job");
        }

        tokio::time::timeout(JOB_DURATION + Duration::from_millis(50), done_rx.recv())
            .await
            .expect("timed out waiting for jobs to run");

        // Serial execution would have taken JOB_COUNT * JOB_DURATION.
        assert!(started.elapsed() < JOB_DURATION + Duration::from_millis(50));
    }

    #[tokio::test]
    async fn rejects_admissions_when_not_started() {
        let parallel = ParallelScheduler::new("test-handler");

        let job = Job::new(|_cancel| Box::pin(async { Ok(()) }));
        assert!(matches!(
            parallel.add(job).await,
            Err(SchedulerError::NotStarted)
        ));
    }

    #[tokio::test]
    async fn pause_cancels_running_jobs() {
        let parallel = ParallelScheduler::new("test-handler");
        parallel.start().expect("start");

        let (tx, rx) = oneshot::channel();
        let job = Job::new(move |cancel| {
            Box::pin(async move {
                cancel.cancelled().await;
                let _ = tx.send(());
                Ok(())
            })
        });

        parallel.add(job).await.expect("add job");
        sleep(Duration::from_millis(20)).await;
        parallel.pause().expect("pause");

        tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("cancellation propagated")
            .expect("job observed cancel");
    }
}
