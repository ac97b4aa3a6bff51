//! Error types for a3s-audit

use thiserror::Error;

/// Errors that can occur while stamping or auditing entities
#[derive(Debug, Error)]
pub enum AuditError {
    /// Two stamp roles resolve to the same materialized field
    #[error("Stamp roles '{first}' and '{second}' both map to field '{field}'")]
    Conflict {
        field: String,
        first: String,
        second: String,
    },

    /// A non-nullable actor field has no resolvable actor
    #[error("No actor available for non-nullable field '{field}' on '{entity_type}'")]
    MissingActor {
        entity_type: String,
        field: String,
    },

    /// Override names a role that has no default and no type
    #[error("Unknown stamp role '{0}'")]
    UnknownStampRole(String),

    /// Actor resolution failure
    #[error("Actor resolution failed: {0}")]
    Actor(String),

    /// Handler failure
    #[error("Handler '{handler}' failed: {reason}")]
    Handler {
        handler: String,
        reason: String,
    },

    /// Configuration error (malformed document, unreadable file, poisoned lock)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Event sink failure
    #[error("Sink error: {0}")]
    Sink(String),

    /// Value sealing failure
    #[error("Encryption error: {0}")]
    Encryption(String),
}

/// Result type alias for audit operations
pub type Result<T> = std::result::Result<T, AuditError>;
