//! Error types shared by every VitalGrid crate.
//!
//! `HealthError` is the single failure type callers see. `ErrorKind` is its
//! payload-free tag, used for status mapping and for telling "your report
//! was stale" apart from "the system is in trouble".

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for health store operations.
pub type HealthResult<T> = Result<T, HealthError>;

/// Tag identifying the class of a [`HealthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    StaleReport,
    MaxReportsReached,
    EntityNotFound,
    EntityGraphTooDeep,
    OperationTimedOut,
    Unauthorized,
    Transient,
    CommunicationError,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::StaleReport => "stale_report",
            ErrorKind::MaxReportsReached => "max_reports_reached",
            ErrorKind::EntityNotFound => "entity_not_found",
            ErrorKind::EntityGraphTooDeep => "entity_graph_too_deep",
            ErrorKind::OperationTimedOut => "operation_timed_out",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Transient => "transient",
            ErrorKind::CommunicationError => "communication_error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by the ledger, the query engine and the client facade.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HealthError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("stale report: {0}")]
    StaleReport(String),

    #[error("max reports reached: {0}")]
    MaxReportsReached(String),

    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("entity graph deeper than {limit} levels at {entity}")]
    EntityGraphTooDeep { entity: String, limit: usize },

    #[error("operation timed out after {0:?}")]
    OperationTimedOut(Duration),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("communication error: {0}")]
    CommunicationError(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl HealthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HealthError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            HealthError::StaleReport(_) => ErrorKind::StaleReport,
            HealthError::MaxReportsReached(_) => ErrorKind::MaxReportsReached,
            HealthError::EntityNotFound(_) => ErrorKind::EntityNotFound,
            HealthError::EntityGraphTooDeep { .. } => ErrorKind::EntityGraphTooDeep,
            HealthError::OperationTimedOut(_) => ErrorKind::OperationTimedOut,
            HealthError::Unauthorized(_) => ErrorKind::Unauthorized,
            HealthError::Transient(_) => ErrorKind::Transient,
            HealthError::CommunicationError(_) => ErrorKind::CommunicationError,
            HealthError::Cancelled => ErrorKind::Cancelled,
            HealthError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether resubmitting the same request may succeed. Stale and
    /// malformed reports never become valid by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transient | ErrorKind::OperationTimedOut | ErrorKind::CommunicationError
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_and_systemic_failures_are_distinct() {
        let stale = HealthError::StaleReport("seq 3 <= 5".to_string());
        let transient = HealthError::Transient("store busy".to_string());
        assert_ne!(stale.kind(), transient.kind());
        assert!(!stale.is_retryable());
        assert!(transient.is_retryable());
    }

    #[test]
    fn kinds_serialize_snake_case() {
        let json = serde_json::to_string(&ErrorKind::MaxReportsReached).unwrap();
        assert_eq!(json, "\"max_reports_reached\"");
        assert_eq!(ErrorKind::EntityGraphTooDeep.to_string(), "entity_graph_too_deep");
    }

    #[test]
    fn display_includes_context() {
        let err = HealthError::EntityGraphTooDeep {
            entity: "Node(n1)".to_string(),
            limit: 4,
        };
        assert_eq!(err.to_string(), "entity graph deeper than 4 levels at Node(n1)");
        assert_eq!(
            HealthError::OperationTimedOut(Duration::from_millis(250)).kind(),
            ErrorKind::OperationTimedOut
        );
    }
}
