//! Request authentication against a handler's auth descriptor.

use axum::http::HeaderMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use pirate_config::{Auth, Handler};
use pirate_runner::{run_script, RunnerError};

use crate::error::ServerError;
use crate::server::COMMAND_SCRIPT_PREFIX;

/// Header carrying the caller's token.
pub const TOKEN_HEADER: &str = "X-Authorization";

/// Validates a request against the handler's auth descriptor. `cancel`
/// bounds the whole check; an auth command still running when it fires
/// is killed.
pub(crate) async fn validate_request(
    cancel: &CancellationToken,
    handler: &Handler,
    headers: &HeaderMap,
) -> Result<(), ServerError> {
    let token = headers
        .get(TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    match &handler.auth {
        Auth::List { token: allowed } => {
            debug!(handler = %handler.name, "Using list validator");

            if allowed.iter().any(|candidate| candidate == token) {
                Ok(())
            } else {
                Err(ServerError::AuthFailed)
            }
        }

        Auth::Command { run } => {
            debug!(handler = %handler.name, "Using command validator");

            let env = vec![
                ("PIRATE_TOKEN".to_string(), token.to_string()),
                ("PIRATE_NAME".to_string(), handler.name.clone()),
            ];

            match run_script(cancel, COMMAND_SCRIPT_PREFIX, run, &env).await {
                Ok(()) => Ok(()),
                Err(RunnerError::Exit { .. }) => Err(ServerError::AuthFailed),
                Err(error) => Err(ServerError::AuthCommand(error)),
            }
        }
    }
}
