//! At-most-one policy: a running job makes every other admission fail.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::{self, AdmitReply, Event, EVENT_CHANNEL_SIZE};
use crate::job::{spawn_execute, Job, JobState};
use crate::{Scheduler, SchedulerError};

/// Scheduler that admits one job at a time and rejects the rest with
/// [`SchedulerError::JobDropped`] until the current job ends. Admissions
/// to a scheduler that is not started are rejected with
/// [`SchedulerError::NotStarted`].
pub struct DropScheduler {
    name: String,
    events: mpsc::Sender<Event>,
}

impl DropScheduler {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

        let event_loop = EventLoop {
            current_job: None,
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
impl Scheduler for DropScheduler {
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
    /// Identity of the job occupying the single slot, if any.
    current_job: Option<Uuid>,
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

                if self.current_job.is_some() {
                    if let Some(reply) = reply {
                        let _ = reply.send(AdmitReply::Dropped);
                    }
                    return;
                }

                self.current_job = Some(job.id());
                job.mark_added();
                job.set_state(JobState::Queued);
                if let Some(reply) = reply {
                    let _ = reply.send(AdmitReply::Admitted);
                }

                job.set_state(JobState::Running);
                spawn_execute(job, self.cancel.child_token(), self.events.clone());
            }

            Event::JobEnded => self.current_job = None,

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
    use std::time::Duration;
    use tokio::time::sleep;

    const JOB_DURATION: Duration = Duration::from_millis(500);

    fn sleeping_job(duration: Duration) -> Job {
        Job::new(move |_cancel| {
            Box::pin(async move {
                sleep(duration).await;
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn executes_an_admitted_job() {
        let drop = DropScheduler::new("test-handler");
        drop.start().expect("start");

        let (tx, rx) = oneshot::channel();
        let job = Job::new(move |_cancel| {
            Box::pin(async move {
                sleep(JOB_DURATION).await;
                let _ = tx.send(());
                Ok(())
            })
        });

        drop.add(job).await.expect("add job");

        tokio::time::timeout(2 * JOB_DURATION, rx)
            .await
            .expect("timed out waiting for job to finish")
            .expect("job completed");
    }

    #[tokio::test]
    async fn drops_admissions_while_a_job_is_running() {
        let drop = DropScheduler::new("test-handler");
        drop.start().expect("start");

        drop.add(sleeping_job(JOB_DURATION)).await.expect("add job");

        for _ in 0..3 {
            let err = drop
                .add(sleeping_job(Duration::ZERO))
                .await
                .expect_err("admission while busy");
            assert!(matches!(err, SchedulerError::JobDropped));
        }
    }

    #[tokio::test]
    async fn admits_again_after_the_current_job_ends() {
        let drop = DropScheduler::new("test-handler");
        drop.start().expect("start");

        drop.add(sleeping_job(Duration::from_millis(50)))
            .await
            .expect("first admission");
        sleep(Duration::from_millis(150)).await;

        drop.add(sleeping_job(Duration::ZERO))
            .await
            .expect("slot freed after completion");
    }

    #[tokio::test]
    async fn rejects_admissions_when_not_started() {
        let drop = DropScheduler::new("test-handler");

        assert!(matches!(
            drop.add(sleeping_job(Duration::ZERO)).await,
            Err(SchedulerError::NotStarted)
        ));
    }
}
