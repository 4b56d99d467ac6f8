//! Materialize a script to a temp file, run it under `bash`, and stream
//! its output into the server log.

use std::io::{self, Write};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::buffer::SafeBuffer;
use crate::RunnerError;

/// Cadence at which captured subprocess output is drained into the log.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Returns a child of `parent` that is cancelled after `after` elapses
/// (or as soon as `parent` is cancelled, whichever comes first).
pub fn deadline_token(parent: &CancellationToken, after: Duration) -> CancellationToken {
    let token = parent.child_token();

    let deadline = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = deadline.cancelled() => {}
            _ = tokio::time::sleep(after) => deadline.cancel(),
        }
    });

    token
}

/// Executes `script` in a shell, appending `env` to the inherited
/// environment.
///
/// The script body is written to a temp file named `<prefix><random>`,
/// which is deleted when this function returns. Stdout and stderr stream
/// into buffers that are drained into the log every [`FLUSH_INTERVAL`]
/// and once more after the process exits, so trailing output is never
/// lost. Cancelling `cancel` kills the process.
///
/// Returns an error when the temp file cannot be created or written,
/// when the process cannot be started, or when it exits non-zero.
pub async fn run_script(
    cancel: &CancellationToken,
    prefix: &str,
    script: &str,
    env: &[(String, String)],
) -> Result<(), RunnerError> {
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .tempfile()
        .map_err(RunnerError::CreateScript)?;

    file.write_all(script.as_bytes())
        .map_err(RunnerError::WriteScript)?;
    file.flush().map_err(RunnerError::WriteScript)?;

    let written = file
        .as_file()
        .metadata()
        .map_err(RunnerError::WriteScript)?
        .len();
    if written != script.len() as u64 {
        return Err(RunnerError::WriteScript(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("wrote {written} bytes, want {}", script.len()),
        )));
    }

    debug!(path = %file.path().display(), "Script materialized");

    // Scopes the flusher to this invocation; cancelled once the process
    // has been reaped.
    let child_cancel = cancel.child_token();

    let mut child = Command::new("bash")
        .arg(file.path())
        .envs(env.iter().cloned())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(RunnerError::Spawn)?;

    let stdout_buf = SafeBuffer::new();
    let stderr_buf = SafeBuffer::new();

    let stdout_task = capture(child.stdout.take().expect("stdout is piped"), &stdout_buf);
    let stderr_task = capture(child.stderr.take().expect("stderr is piped"), &stderr_buf);

    let flusher = spawn_flusher(child_cancel.clone(), stdout_buf.clone(), stderr_buf.clone());

    let status = tokio::select! {
        status = child.wait() => status,
        _ = cancel.cancelled() => {
            debug!("Cancelled, killing script process");
            let _ = child.start_kill();
            child.wait().await
        }
    };

    child_cancel.cancel();
    let _ = stdout_task.await;
    let _ = stderr_task.await;
    let _ = flusher.await;

    // Residual output that arrived after the last tick.
    flush_output(&stdout_buf, &stderr_buf);

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(RunnerError::Exit {
            code: status.code().unwrap_or(1),
        }),
        Err(err) => {
            error!(error = %err, "Could not reap script process");
            Err(RunnerError::Exit { code: 1 })
        }
    }
}

/// Copies a child output pipe into a buffer until EOF.
fn capture<R>(mut pipe: R, buf: &SafeBuffer) -> JoinHandle<()>
where
    R: AsyncReadExt + Unpin + Send + 'static,
{
    let buf = buf.clone();
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => {
                    buf.write(&chunk[..n]);
                }
            }
        }
    })
}

fn spawn_flusher(
    cancel: CancellationToken,
    stdout: SafeBuffer,
    stderr: SafeBuffer,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
        // The first tick of an interval completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => flush_output(&stdout, &stderr),
            }
        }
    })
}

/// Atomically drains both buffers, logging non-blank stdout at INFO and
/// non-blank stderr at ERROR.
fn flush_output(stdout: &SafeBuffer, stderr: &SafeBuffer) {
    let out = stdout.take();
    let err = stderr.take();

    if !out.trim().is_empty() {
        info!(stream = "stdout", "{}", out.trim_end());
    }

    if !err.trim().is_empty() {
        error!(stream = "stderr", "{}", err.trim_end());
    }
}
