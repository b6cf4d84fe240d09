//! Error types and handling
//!
//! Typed errors for the capture, retention, and compliance surfaces. Callers
//! can rely on the variant to distinguish a missing record from a failed
//! operation; a generic error is never returned for a valid not-found case.

use thiserror::Error;

/// Engine error types
#[derive(Debug, Error)]
pub enum EngineError {
    /// Requested record or policy does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation/snapshot combination violates the audit invariants
    /// (e.g. `created` without an after-snapshot) — a caller bug
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// Two distinct policies resolve to the same entity type
    #[error("Policy conflict: {0}")]
    PolicyConflict(String),

    /// Append to the audit store failed. Fatal to the enclosing mutation:
    /// the caller must treat the business write as failed.
    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    /// Invalid input that is not a snapshot-invariant violation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => EngineError::NotFound("Record not found".to_string()),
            _ => EngineError::Database(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Database(format!("{err:#}"))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Validation(format!("JSON error: {err}"))
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
