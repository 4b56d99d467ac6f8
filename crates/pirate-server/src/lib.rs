//! HTTP surface and lifecycle of the pirate webhook dispatcher.
//!
//! A [`Server`] owns the parsed configuration and one scheduler per
//! configured handler. Incoming `POST`s are matched to a handler by
//! exact endpoint path, authenticated, and turned into jobs the
//! handler's scheduler runs in the background.

pub mod error;
pub mod logging;
pub mod routes;
pub mod server;
pub mod validate;

pub use error::ServerError;
pub use server::Server;
