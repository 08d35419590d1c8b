//! Error types for the report store.

use thiserror::Error;
use vitalgrid_core::HealthError;

/// Result type alias for report store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during report store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether the same operation may succeed if retried. Encoding
    /// failures are deterministic and never are.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Transaction(_)
                | StoreError::Read(_)
                | StoreError::Write(_)
                | StoreError::Unavailable(_)
        )
    }
}

impl From<StoreError> for HealthError {
    fn from(e: StoreError) -> Self {
        if e.is_transient() {
            HealthError::Transient(e.to_string())
        } else {
            HealthError::Internal(e.to_string())
        }
    }
}
