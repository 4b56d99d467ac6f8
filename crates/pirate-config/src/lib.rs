//! Configuration for the pirate webhook server.
//!
//! This crate handles parsing of the YAML configuration file
//! (`ship.yml` by default): the server block, and one handler block per
//! webhook endpoint with its authentication descriptor, execution policy
//! and shell script body.

pub mod error;
pub mod load;
pub mod schema;
pub mod units;

pub use error::ConfigError;
pub use load::{load, load_file, parse, Source, CONFIG_ENV_VAR, DEFAULT_FILENAME};
pub use schema::{Auth, Config, ExecutionPolicy, Handler, LogSink, Logging, ServerConfig};
pub use units::ByteSize;
