//! Server error handling.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use pirate_runner::RunnerError;
use pirate_scheduler::SchedulerError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("no matching handler was found")]
    HandlerNotFound,

    #[error("authentication failed")]
    AuthFailed,

    /// The auth command could not run at all (as opposed to exiting
    /// non-zero, which is [`ServerError::AuthFailed`]).
    #[error("auth command error: {0}")]
    AuthCommand(#[source] RunnerError),

    #[error("could not read the request body")]
    BodyRead,

    #[error("could not initialize log sink: {0}")]
    Logging(#[source] std::io::Error),

    #[error("failed to start scheduler '{name}': {source}")]
    Scheduler {
        name: String,
        #[source]
        source: SchedulerError,
    },
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        // Lookup and validation failures are deliberately
        // indistinguishable, and no error text ever reaches the client.
        let status = match self {
            ServerError::BodyRead => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::NOT_FOUND,
        };

        status.into_response()
    }
}
