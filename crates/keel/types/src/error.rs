use thiserror::Error;

/// Result type for scheme operations.
pub type SchemeResult<T> = Result<T, SchemeError>;

/// Errors raised while validating or decoding objects against the scheme.
#[derive(Debug, Error)]
pub enum SchemeError {
    #[error("kind not registered: {0}")]
    UnknownKind(String),

    #[error("expected kind {expected}, found {found}")]
    KindMismatch { expected: String, found: String },

    #[error("{kind} must use apiVersion {expected}, found {found}")]
    ApiVersionMismatch {
        kind: String,
        expected: String,
        found: String,
    },

    #[error("{kind} objects must have a name")]
    MissingName { kind: String },

    #[error("{kind} {name} is namespaced but has no namespace")]
    MissingNamespace { kind: String, name: String },

    #[error("malformed {kind}: {source}")]
    Decode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}
