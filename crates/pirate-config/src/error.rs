//! Configuration loading and validation errors.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field is missing or empty. Carries the dotted path of
    /// the field, e.g. `handler[0].auth.token`.
    #[error("field '{0}' must be set")]
    MustBeSet(String),

    #[error("file not found: '{}'", .0.display())]
    FileNotFound(PathBuf),

    #[error("could not parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
