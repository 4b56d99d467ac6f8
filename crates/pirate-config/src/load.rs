//! Config file resolution and loading.

use std::env;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use crate::error::ConfigError;
use crate::schema::Config;

/// Environment variable consulted when no `--config` flag is passed.
pub const CONFIG_ENV_VAR: &str = "PIRATE_CONFIG_PATH";

/// File name assumed in the working directory as the last resort.
pub const DEFAULT_FILENAME: &str = "ship.yml";

/// Where the configuration was read from. Reported alongside the config
/// to aid debugging startup problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Flag,
    Env,
    CurDir,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Source::Flag => "load-from-flag",
            Source::Env => "load-from-env",
            Source::CurDir => "load-from-cur-dir",
        };
        f.write_str(s)
    }
}

/// Loads the config from the first available source: the flag value (if
/// passed), `$PIRATE_CONFIG_PATH`, then `./ship.yml`.
pub fn load(flag: Option<&Path>) -> Result<(Config, Source), ConfigError> {
    if let Some(path) = flag {
        return Ok((load_file(path)?, Source::Flag));
    }

    if let Some(path) = env::var_os(CONFIG_ENV_VAR).filter(|v| !v.is_empty()) {
        return Ok((load_file(Path::new(&path))?, Source::Env));
    }

    let cwd = env::current_dir()?;
    Ok((load_file(&cwd.join(DEFAULT_FILENAME))?, Source::CurDir))
}

/// Loads and validates the config at `path`.
pub fn load_file(path: &Path) -> Result<Config, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => ConfigError::FileNotFound(path.to_path_buf()),
        _ => ConfigError::Io(err),
    })?;

    parse(&raw)
}

/// Parses and validates a config document. Defaults for optional fields
/// are applied during deserialization.
pub fn parse(raw: &str) -> Result<Config, ConfigError> {
    let cfg: Config = serde_yaml::from_str(raw)?;
    cfg.validate()?;
    Ok(cfg)
}
