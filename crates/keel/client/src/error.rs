use keel_types::{ObjectKey, SchemeError};
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the resource client facade.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: ObjectKey },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: String, key: ObjectKey },

    /// The write carried a stale version token
    #[error("conflict writing {kind} {key}: sent version {sent}, stored version {stored}")]
    Conflict {
        kind: String,
        key: ObjectKey,
        sent: String,
        stored: String,
    },

    #[error("invalid object: {0}")]
    Invalid(#[from] SchemeError),

    #[error("invalid label selector: {0}")]
    InvalidSelector(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

impl ClientError {
    pub fn not_found(kind: impl Into<String>, key: ObjectKey) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClientError::Conflict { .. })
    }
}
