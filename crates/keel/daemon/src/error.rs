//! Daemon error types

use crate::config::ConfigError;
use keel_client::ClientError;
use keel_controller::ReconcileError;
use keel_provision::ProvisionError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Errors that stop the daemon from starting or running
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("catalog error: {0}")]
    Catalog(#[from] ProvisionError),

    #[error("cluster error: {0}")]
    Client(#[from] ClientError),

    #[error("controller error: {0}")]
    Controller(#[from] ReconcileError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid bootstrap file {path}: {source}")]
    Bootstrap {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
