//! Log sink setup: JSON-structured records to stdout or to a
//! timestamped file under the configured directory.

use std::fs::{DirBuilder, OpenOptions};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use pirate_config::LogSink;

use crate::error::ServerError;
use crate::server::CleanupFn;

pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d--%H-%M-%S";

const DIR_PERMS: u32 = 0o744;
const FILE_PERMS: u32 = 0o644;

/// Installs the global log sink and returns its close callback.
///
/// Installation is best-effort: if a subscriber is already set (a second
/// server in the same process), the existing sink is kept.
pub(crate) fn init(sink: &LogSink) -> Result<CleanupFn, ServerError> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    match sink {
        LogSink::Stdout => {
            let result = tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter())
                .with_writer(std::io::stdout)
                .try_init();
            if let Err(err) = result {
                debug!("Log sink already initialized: {err}");
            }

            Ok(Box::new(|| Box::pin(async {})))
        }

        LogSink::File(dir) => {
            let dir = resolve_log_dir(dir).map_err(ServerError::Logging)?;

            DirBuilder::new()
                .recursive(true)
                .mode(DIR_PERMS)
                .create(&dir)
                .map_err(ServerError::Logging)?;

            let timestamp = Local::now().format(LOG_TIMESTAMP_FORMAT);
            let path = dir.join(format!("{timestamp}.log"));

            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .mode(FILE_PERMS)
                .open(&path)
                .map_err(ServerError::Logging)?;
            let file = Arc::new(file);

            let result = tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter())
                .with_writer(file.clone())
                .try_init();
            if let Err(err) = result {
                debug!("Log sink already initialized: {err}");
            }

            Ok(Box::new(move || {
                Box::pin(async move {
                    let _ = file.sync_all();
                })
            }))
        }
    }
}

/// Expands a leading `~/` and makes the directory absolute.
fn resolve_log_dir(dir: &Path) -> std::io::Result<PathBuf> {
    let expanded = match dir.strip_prefix("~") {
        Ok(rest) => {
            let home = std::env::var_os("HOME").ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "could not get user home dir: HOME is not set",
                )
            })?;
            PathBuf::from(home).join(rest)
        }
        Err(_) => dir.to_path_buf(),
    };

    std::path::absolute(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_dirs_become_absolute() {
        let resolved = resolve_log_dir(Path::new("logs")).expect("resolves");
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("logs"));
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = std::env::var("HOME").expect("HOME set in test env");
        let resolved = resolve_log_dir(Path::new("~/pirate-logs")).expect("resolves");
        assert_eq!(resolved, Path::new(&home).join("pirate-logs"));
    }
}
