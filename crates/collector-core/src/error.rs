//! Unified error taxonomy shared by every Collector crate.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;

/// Generic message shown to users when a worker fails for an unexpected reason.
pub const UNEXPECTED_FAILURE_MESSAGE: &str =
    "Unexpected error while processing this job. Check the server logs and retry.";

/// Unified error type for all layers of Collector.
///
/// Each crate keeps its own narrow error enum and converts into this one at
/// the host-facing boundary, so the HTTP layer only has to understand a
/// single taxonomy.
#[derive(Error, Debug)]
pub enum CollectorError {
    // ============ Caller Errors ============
    /// Bad submission input, correctable by the caller.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Resource not found
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound {
        resource_type: &'static str,
        id: String,
    },

    // ============ Lifecycle Errors ============
    /// A lifecycle call that the current status does not allow.
    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: String,
    },

    /// The job already reached a terminal status.
    #[error("Job {job_id} is already {status}")]
    AlreadyTerminal { job_id: String, status: String },

    // ============ Session Errors ============
    /// No encryption key is configured, so session material cannot be persisted.
    #[error("Session encryption key is not configured")]
    MissingEncryptionKey,

    /// Stored session material could not be decrypted.
    #[error("Session for {0} could not be decrypted")]
    DecryptionFailure(String),

    // ============ Infrastructure Errors ============
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The scheduler is shutting down and no longer admits work.
    #[error("Service is shutting down")]
    ShuttingDown,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CollectorError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound { .. } => 404,
            Self::InvalidTransition { .. } | Self::AlreadyTerminal { .. } => 409,
            Self::ShuttingDown => 503,
            Self::MissingEncryptionKey
            | Self::DecryptionFailure(_)
            | Self::Database(_)
            | Self::Configuration(_)
            | Self::Internal(_)
            | Self::Other(_) => 500,
        }
    }

    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::AlreadyTerminal { .. } => "ALREADY_TERMINAL",
            Self::MissingEncryptionKey => "MISSING_ENCRYPTION_KEY",
            Self::DecryptionFailure(_) => "DECRYPTION_FAILURE",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Internal(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns a short message that is safe to show to an end user.
    ///
    /// Infrastructure details are never included; they belong in the logs.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::NotFound { resource_type, .. } => format!("{resource_type} not found"),
            Self::InvalidTransition { .. } | Self::AlreadyTerminal { .. } => {
                "The job is no longer in a state that allows this action".to_string()
            }
            Self::MissingEncryptionKey => {
                "Session storage is disabled until an encryption key is configured".to_string()
            }
            Self::DecryptionFailure(_) => {
                "The stored session could not be read. Upload the cookies again.".to_string()
            }
            Self::ShuttingDown => "The service is shutting down. Try again shortly.".to_string(),
            Self::Database(_) | Self::Configuration(_) | Self::Internal(_) | Self::Other(_) => {
                UNEXPECTED_FAILURE_MESSAGE.to_string()
            }
        }
    }

    /// Creates a not found error for a resource.
    #[must_use]
    pub fn not_found<T: ToString>(resource_type: &'static str, id: T) -> Self {
        Self::NotFound {
            resource_type,
            id: id.to_string(),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation(message.into())
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal(message.into())
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for CollectorError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound {
                resource_type: "database_row",
                id: "unknown".to_string(),
            },
            _ => Self::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CollectorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON serialization error: {err}"))
    }
}

/// Serializable error body for the host-facing layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl ErrorResponse {
    /// Creates a new error response from a `CollectorError`.
    #[must_use]
    pub fn from_error(error: &CollectorError) -> Self {
        Self {
            code: error.error_code().to_string(),
            message: error.user_message(),
        }
    }
}

impl From<&CollectorError> for ErrorResponse {
    fn from(error: &CollectorError) -> Self {
        Self::from_error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(CollectorError::validation("bad url").status_code(), 400);
        assert_eq!(CollectorError::not_found("Job", "abc").status_code(), 404);
        assert_eq!(
            CollectorError::AlreadyTerminal {
                job_id: "abc".to_string(),
                status: "completed".to_string(),
            }
            .status_code(),
            409
        );
        assert_eq!(CollectorError::MissingEncryptionKey.status_code(), 500);
        assert_eq!(CollectorError::ShuttingDown.status_code(), 503);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(CollectorError::validation("x").error_code(), "VALIDATION_ERROR");
        assert_eq!(
            CollectorError::MissingEncryptionKey.error_code(),
            "MISSING_ENCRYPTION_KEY"
        );
        assert_eq!(
            CollectorError::DecryptionFailure("alice".to_string()).error_code(),
            "DECRYPTION_FAILURE"
        );
        assert_eq!(CollectorError::internal("x").error_code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_user_message_hides_internals() {
        let err = CollectorError::Database("disk I/O error at page 17".to_string());
        assert_eq!(err.user_message(), UNEXPECTED_FAILURE_MESSAGE);

        let err = CollectorError::validation("URL is required");
        assert_eq!(err.user_message(), "URL is required");
    }

    #[test]
    fn test_error_response() {
        let response = ErrorResponse::from(&CollectorError::not_found("Job", "42"));
        assert_eq!(response.code, "NOT_FOUND");
        assert_eq!(response.message, "Job not found");
    }
}
