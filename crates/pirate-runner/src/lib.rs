//! Shell script execution for the pirate webhook dispatcher.
//!
//! Scripts are materialized to a temp file and run under `bash`, with
//! stdout and stderr streamed into [`SafeBuffer`]s that a flusher task
//! drains into the server log every few seconds.

pub mod buffer;
pub mod script;

use thiserror::Error;

pub use buffer::SafeBuffer;
pub use script::{deadline_token, run_script, FLUSH_INTERVAL};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("could not create script file: {0}")]
    CreateScript(#[source] std::io::Error),

    #[error("could not write script file: {0}")]
    WriteScript(#[source] std::io::Error),

    #[error("could not start command: {0}")]
    Spawn(#[source] std::io::Error),

    /// The script ran and exited non-zero (or was killed). `code` is 1
    /// when the OS reported no exit code.
    #[error("script exited with code {code}")]
    Exit { code: i32 },
}
