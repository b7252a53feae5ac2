//! Error taxonomy returned by every facade operation, plus the errors the
//! external collaborators report before they are mapped.

use std::{future::Future, time::Duration};

use thiserror::Error;

use crate::domain::status::SessionPhase;

/// Failure reported by the persistent store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("unique constraint violated")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("store rejected the request: {0}")]
    Rejected(String),
}

/// Failure reported by the authentication boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("no authenticated user")]
    NotAuthenticated,
    #[error("auth provider unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinationError {
    #[error("invalid {field}: {reason}")]
    InvalidInput {
        field: &'static str,
        reason: &'static str,
    },
    #[error("session could not be resolved")]
    InvalidSession,
    #[error("sign in to post in this session")]
    AuthenticationRequired,
    #[error("slow down, try again in {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("not allowed to modify another member's content")]
    PermissionDenied,
    #[error("connection lost, retry when reconnected")]
    Disconnected,
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },
    /// The cause is kept for diagnostics; Display never shows it.
    #[error("store operation failed")]
    StoreFailure(#[source] StoreError),
    #[error("operation not valid while {}", .phase.as_label())]
    InvalidState { phase: SessionPhase },
}

impl CoordinationError {
    pub fn invalid_input(field: &'static str, reason: &'static str) -> Self {
        Self::InvalidInput { field, reason }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Disconnected)
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::InvalidSession => "INVALID_SESSION",
            Self::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::Disconnected => "DISCONNECTED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::StoreFailure(_) => "STORE_FAILURE",
            Self::InvalidState { .. } => "INVALID_STATE",
        }
    }

    /// Underlying store error, for logging only.
    pub fn cause(&self) -> Option<&StoreError> {
        match self {
            Self::StoreFailure(cause) => Some(cause),
            _ => None,
        }
    }
}

/// Maps a store failure on a write path.
pub(crate) fn map_store_error(error: StoreError) -> CoordinationError {
    match error {
        StoreError::Unavailable(_) => CoordinationError::Disconnected,
        other => CoordinationError::StoreFailure(other),
    }
}

/// Runs one store round-trip under the operation timeout.
pub(crate) async fn store_call<T, F>(
    operation: &'static str,
    limit: Duration,
    call: F,
) -> Result<T, CoordinationError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(map_store_error),
        Err(_) => Err(CoordinationError::Timeout { operation }),
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(CoordinationError::Disconnected.is_retryable());
        assert!(CoordinationError::Timeout { operation: "resolve" }.is_retryable());

        assert!(!CoordinationError::PermissionDenied.is_retryable());
        assert!(!CoordinationError::RateLimited { retry_after_ms: 10 }.is_retryable());
        assert!(!CoordinationError::invalid_input("content", "empty").is_retryable());
    }

    #[test]
    fn store_failure_hides_cause_from_display() {
        let error = CoordinationError::StoreFailure(StoreError::Rejected(
            "violates policy messages_insert token=abc123".to_owned(),
        ));

        assert_eq!(error.to_string(), "store operation failed");
        assert!(error.source().is_some());
        assert_eq!(
            error.cause(),
            Some(&StoreError::Rejected(
                "violates policy messages_insert token=abc123".to_owned()
            ))
        );
    }

    #[test]
    fn invalid_state_names_the_phase() {
        let error = CoordinationError::InvalidState {
            phase: SessionPhase::Closed,
        };

        assert_eq!(error.to_string(), "operation not valid while SESSION_CLOSED");
        assert_eq!(error.code(), "INVALID_STATE");
    }

    #[test]
    fn unavailable_store_maps_to_disconnected() {
        assert_eq!(
            map_store_error(StoreError::Unavailable("socket closed".to_owned())),
            CoordinationError::Disconnected
        );
        assert_eq!(
            map_store_error(StoreError::NotFound),
            CoordinationError::StoreFailure(StoreError::NotFound)
        );
    }
}
