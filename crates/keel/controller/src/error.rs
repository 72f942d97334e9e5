use keel_client::ClientError;
use keel_provision::ProvisionError;
use keel_types::ObjectKey;
use thiserror::Error;

/// Result type for reconcile passes.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Errors that end a reconcile pass early.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// An owner has not been persisted yet, so nothing can reference it
    #[error("{kind} {key} has no uid")]
    MissingUid { kind: String, key: ObjectKey },

    #[error("action {action} failed: {source}")]
    ActionFailed {
        action: String,
        #[source]
        source: Box<ReconcileError>,
    },

    #[error("controller task failed: {0}")]
    Task(String),
}

impl ReconcileError {
    /// Whether the pass lost an optimistic-concurrency race and should be
    /// redone from a fresh read rather than backed off
    pub fn is_conflict(&self) -> bool {
        match self {
            ReconcileError::Client(e) => e.is_conflict(),
            ReconcileError::Provision(e) => e.is_conflict(),
            ReconcileError::ActionFailed { source, .. } => source.is_conflict(),
            _ => false,
        }
    }

    pub(crate) fn missing_uid(kind: &str, key: ObjectKey) -> Self {
        ReconcileError::MissingUid {
            kind: kind.to_string(),
            key,
        }
    }
}
