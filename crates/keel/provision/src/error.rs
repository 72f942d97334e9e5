use keel_client::ClientError;
use keel_types::SchemeError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for provisioning operations.
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Errors raised while rendering or applying module manifests.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("no template {repo_ref}:{tag} in catalog")]
    TemplateNotFound { repo_ref: String, tag: String },

    #[error("template {template} references missing value {placeholder}")]
    MissingValue {
        template: String,
        placeholder: String,
    },

    #[error("template {template} produced an invalid manifest: {reason}")]
    InvalidManifest { template: String, reason: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("rejected object: {0}")]
    Invalid(#[from] SchemeError),

    #[error(transparent)]
    Client(#[from] ClientError),
}

impl ProvisionError {
    /// Whether the failure was a stale-version write
    pub fn is_conflict(&self) -> bool {
        matches!(self, ProvisionError::Client(e) if e.is_conflict())
    }
}
