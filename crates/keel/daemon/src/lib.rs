//! Keel Daemon library
//!
//! Process-level wiring for `keeld`:
//! - Layered configuration with fail-fast validation
//! - Bootstrap seed objects
//! - Server lifecycle around the controller manager

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod server;

pub use config::{ConfigError, DaemonConfig, LoggingConfig, RawDaemonConfig};
pub use error::{DaemonError, DaemonResult};
pub use server::Server;
