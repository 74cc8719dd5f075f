//! Typed error handling for dispatch operations.
//!
//! Failures are split by how the orchestrator treats them:
//! - Permanent failures (bad configuration, failed validation) are never retried
//! - Temporary failures (delivery or enrichment trouble) are retried with backoff
//! - System errors describe the engine itself, not the dispatch

use std::time::Duration;

use formflow_rules::{ConfigError, TransformError};
use thiserror::Error;

/// Longest response body kept in a [`TemporaryError::HttpStatus`].
const MAX_BODY_EXCERPT: usize = 256;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),

    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// Failures that will fail the same way on every attempt.
#[derive(Debug, Error)]
pub enum PermanentError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Every failed field check, in required-field order.
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Transformation failed: {0}")]
    Transformation(#[from] TransformError),

    #[error("Retries exhausted after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },
}

/// Failures worth another attempt after a backoff.
#[derive(Debug, Error)]
pub enum TemporaryError {
    /// The endpoint answered with a non-2xx status.
    #[error("Delivery rejected with HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("Enrichment failed: {0}")]
    Enrichment(String),
}

#[derive(Debug, Error)]
pub enum SystemError {
    /// Every worker slot is claimed.
    #[error("No worker slot available")]
    NoAvailableWorker,

    #[error("Dispatcher is shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Returns `true` if this error is temporary and should be retried.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }

    /// Returns the failed field checks if this is a validation failure.
    #[must_use]
    pub fn validation_reasons(&self) -> Option<&[String]> {
        match self {
            Self::Permanent(PermanentError::Validation(reasons)) => Some(reasons),
            _ => None,
        }
    }
}

impl TemporaryError {
    /// Build an [`HttpStatus`](Self::HttpStatus) keeping only the start of
    /// the response body.
    #[must_use]
    pub fn http_status(status: u16, body: &str) -> Self {
        let body = match body.char_indices().nth(MAX_BODY_EXCERPT) {
            Some((cut, _)) => format!("{}...", &body[..cut]),
            None => body.to_string(),
        };

        Self::HttpStatus { status, body }
    }
}

impl From<ConfigError> for DispatchError {
    fn from(error: ConfigError) -> Self {
        Self::Permanent(PermanentError::Configuration(error))
    }
}

impl From<TransformError> for DispatchError {
    fn from(error: TransformError) -> Self {
        Self::Permanent(PermanentError::Transformation(error))
    }
}

/// Transport-level failures from the HTTP client are all worth a retry.
impl From<reqwest::Error> for TemporaryError {
    fn from(error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            Self::http_status(status.as_u16(), &error.to_string())
        } else {
            Self::ConnectionFailed(error.to_string())
        }
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(error: reqwest::Error) -> Self {
        Self::Temporary(error.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_error_is_temporary() {
        let error = DispatchError::Temporary(TemporaryError::ConnectionFailed(
            "Connection refused".to_string(),
        ));
        assert!(error.is_temporary());
        assert!(!error.is_permanent());
        assert!(!error.is_system());
    }

    #[test]
    fn test_dispatch_error_is_permanent() {
        let error: DispatchError = ConfigError::CustomerNotFound("CUST9".to_string()).into();
        assert!(!error.is_temporary());
        assert!(error.is_permanent());
        assert!(!error.is_system());
    }

    #[test]
    fn test_dispatch_error_is_system() {
        let error = DispatchError::System(SystemError::NoAvailableWorker);
        assert!(!error.is_temporary());
        assert!(!error.is_permanent());
        assert!(error.is_system());
    }

    #[test]
    fn test_validation_reasons() {
        let error = DispatchError::Permanent(PermanentError::Validation(vec![
            "ssn: invalid format".to_string(),
            "zipCode: missing required field".to_string(),
        ]));
        assert_eq!(error.validation_reasons().map(<[String]>::len), Some(2));
        assert_eq!(
            error.to_string(),
            "Permanent failure: Validation failed: ssn: invalid format; zipCode: missing required field"
        );

        let error = DispatchError::System(SystemError::ShuttingDown);
        assert!(error.validation_reasons().is_none());
    }

    #[test]
    fn test_error_display() {
        let error = DispatchError::Temporary(TemporaryError::http_status(503, "busy"));
        assert_eq!(
            error.to_string(),
            "Temporary failure: Delivery rejected with HTTP 503: busy"
        );

        let error: DispatchError = TransformError {
            field: "dateOfBirth".to_string(),
            reason: "not a recognised date".to_string(),
        }
        .into();
        assert_eq!(
            error.to_string(),
            "Permanent failure: Transformation failed: Cannot transform dateOfBirth: not a recognised date"
        );
    }

    #[test]
    fn test_http_status_truncates_body() {
        let body = "x".repeat(1000);
        let TemporaryError::HttpStatus { status, body } = TemporaryError::http_status(500, &body)
        else {
            panic!("expected an HTTP status error");
        };
        assert_eq!(status, 500);
        assert_eq!(body.len(), MAX_BODY_EXCERPT + 3);
    }
}
