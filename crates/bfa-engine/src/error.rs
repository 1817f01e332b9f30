// crates/bfa-engine/src/error.rs
// Error taxonomy for the scan engine

use thiserror::Error;

/// Main error type for the bfa library
#[derive(Error, Debug)]
pub enum BfaError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported indication kind: {0}")]
    UnsupportedIndication(String),

    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("cannot read {path}: {reason}")]
    ArtifactUnreadable { path: String, reason: String },

    #[error("knowledge base unavailable: {0}")]
    BackendUnavailable(String),

    #[error("scan queue is full ({depth} pending)")]
    QueueFull { depth: usize },

    #[error("migration failed: {0}")]
    MigrationFailure(String),

    #[error("scan cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using BfaError
pub type Result<T> = std::result::Result<T, BfaError>;

impl BfaError {
    /// Convert to the message shown to whoever triggered the operation
    pub fn to_user_string(&self) -> String {
        match self {
            BfaError::QueueFull { .. } => {
                "The scan queue is full, try again later".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Errors that only mean "this indication did not match"
    pub fn is_indication_level(&self) -> bool {
        matches!(
            self,
            BfaError::UnsupportedIndication(_)
                | BfaError::InvalidPattern { .. }
                | BfaError::ArtifactUnreadable { .. }
                | BfaError::Validation(_)
        )
    }
}

impl From<tokio::task::JoinError> for BfaError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            BfaError::Cancelled
        } else {
            BfaError::Other(err.to_string())
        }
    }
}
