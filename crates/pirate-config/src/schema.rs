//! The configuration schema: one server block plus a handler block per
//! webhook endpoint.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;
use crate::units::{self, ByteSize};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MAX_HEADER_BYTES: ByteSize = ByteSize(units::KILOBYTE);

/// The parsed configuration for the pirate server and its handlers.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub handlers: Vec<Handler>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub logging: Logging,
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "units::deserialize_duration"
    )]
    pub request_timeout: Duration,
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: ByteSize,
}

/// Where the server log goes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Logging {
    #[serde(default)]
    pub dir: LogSink,
}

/// Log destination, parsed once at config load: the `:stdout:` sentinel
/// selects standard output, anything else is a directory for timestamped
/// log files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    Stdout,
    File(PathBuf),
}

impl LogSink {
    pub const STDOUT_SENTINEL: &'static str = ":stdout:";

    /// True until a destination has been configured.
    pub fn is_unset(&self) -> bool {
        matches!(self, LogSink::File(path) if path.as_os_str().is_empty())
    }
}

impl Default for LogSink {
    fn default() -> Self {
        LogSink::File(PathBuf::new())
    }
}

impl<'de> Deserialize<'de> for LogSink {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let trimmed = raw.trim();

        if trimmed == Self::STDOUT_SENTINEL {
            Ok(LogSink::Stdout)
        } else {
            Ok(LogSink::File(PathBuf::from(trimmed)))
        }
    }
}

/// A configured webhook endpoint: where it listens, how requests are
/// authenticated, and the script to run when one is accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct Handler {
    pub auth: Auth,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub run: String,
    #[serde(default)]
    pub policy: ExecutionPolicy,
}

/// Authentication of incoming requests, tagged by the `validator` key.
///
/// `list`: the request token must match one of the configured tokens.
/// `command`: the configured script runs with the token in its
/// environment and exit code 0 grants access.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "validator", rename_all = "lowercase")]
pub enum Auth {
    List {
        #[serde(default)]
        token: Vec<String>,
    },
    Command {
        #[serde(default)]
        run: String,
    },
}

/// How overlapping invocations of one handler behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionPolicy {
    #[default]
    Queue,
    Parallel,
    Drop,
}

impl fmt::Display for ExecutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionPolicy::Queue => "queue",
            ExecutionPolicy::Parallel => "parallel",
            ExecutionPolicy::Drop => "drop",
        };
        f.write_str(s)
    }
}

impl Config {
    /// Fails if a required field is missing. Expects defaults to have
    /// been applied already (they are, during deserialization).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.is_empty() {
            return Err(ConfigError::MustBeSet("server.host".into()));
        }

        if self.server.port == 0 {
            return Err(ConfigError::MustBeSet("server.port".into()));
        }

        if self.server.logging.dir.is_unset() {
            return Err(ConfigError::MustBeSet("server.logging.dir".into()));
        }

        if self.server.max_header_bytes.0 == 0 {
            return Err(ConfigError::MustBeSet("server.max-header-bytes".into()));
        }

        for (k, handler) in self.handlers.iter().enumerate() {
            let label = format!("handler[{k}]");

            if handler.endpoint.is_empty() {
                return Err(ConfigError::MustBeSet(format!("{label}.endpoint")));
            }

            if handler.name.is_empty() {
                return Err(ConfigError::MustBeSet(format!("{label}.name")));
            }

            if handler.run.trim().is_empty() {
                return Err(ConfigError::MustBeSet(format!("{label}.run")));
            }

            match &handler.auth {
                Auth::List { token } if token.is_empty() => {
                    return Err(ConfigError::MustBeSet(format!("{label}.auth.token")));
                }
                Auth::Command { run } if run.trim().is_empty() => {
                    return Err(ConfigError::MustBeSet(format!("{label}.auth.run")));
                }
                _ => {}
            }
        }

        Ok(())
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_max_header_bytes() -> ByteSize {
    DEFAULT_MAX_HEADER_BYTES
}
