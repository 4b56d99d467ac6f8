//! The event shape shared by all three scheduler policies.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::job::Job;
use crate::queue::PipelineState;
use crate::SchedulerError;

/// Capacity of every scheduler's event channel. A full channel surfaces
/// as [`SchedulerError::Backpressure`] to the caller.
pub(crate) const EVENT_CHANNEL_SIZE: usize = 100;

/// How long an admission waits for the event loop's reply.
pub(crate) const ADMIT_REPLY_TIMEOUT: Duration = Duration::from_millis(100);

/// Events consumed by a scheduler's event loop.
pub(crate) enum Event {
    JobAdded {
        job: Arc<Job>,
        /// Present for policies that answer admissions (parallel, drop).
        reply: Option<oneshot::Sender<AdmitReply>>,
    },
    JobEnded,
    SchedulerStarted,
    SchedulerPaused,
    QueryPipelineState {
        reply: oneshot::Sender<PipelineState>,
    },
}

/// The event loop's verdict on an admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AdmitReply {
    Admitted,
    Dropped,
    NotStarted,
}

/// Posts an event without blocking, mapping channel conditions onto
/// scheduler errors.
pub(crate) fn post(events: &mpsc::Sender<Event>, event: Event) -> Result<(), SchedulerError> {
    events.try_send(event).map_err(|err| match err {
        mpsc::error::TrySendError::Full(_) => SchedulerError::Backpressure,
        mpsc::error::TrySendError::Closed(_) => SchedulerError::Stopped,
    })
}

/// Awaits an admission reply, translating it into the `add` result.
pub(crate) async fn await_admit_reply(
    reply: oneshot::Receiver<AdmitReply>,
) -> Result<(), SchedulerError> {
    match tokio::time::timeout(ADMIT_REPLY_TIMEOUT, reply).await {
        Err(_) => Err(SchedulerError::AdmitTimeout),
        Ok(Err(_)) => Err(SchedulerError::Stopped),
        Ok(Ok(AdmitReply::Admitted)) => Ok(()),
        Ok(Ok(AdmitReply::Dropped)) => Err(SchedulerError::JobDropped),
        Ok(Ok(AdmitReply::NotStarted)) => Err(SchedulerError::NotStarted),
    }
}
