//! Job error types.

use collector_core::{CollectorError, JobId};
use thiserror::Error;

use crate::job::JobStatus;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job-related errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// Submission input rejected.
    #[error("{0}")]
    Validation(String),

    /// Job not found.
    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// The current status does not allow the requested move.
    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    /// The job already reached a terminal status; nothing was written.
    #[error("Job {job_id} is already {status}")]
    AlreadyTerminal { job_id: JobId, status: JobStatus },

    /// The scheduler no longer admits work.
    #[error("Scheduler is shutting down")]
    ShuttingDown,

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row could not be mapped back to a job.
    #[error("Corrupt job record {id}: {reason}")]
    CorruptRecord { id: String, reason: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl JobError {
    /// Misuse or races that were rejected without touching stored state.
    #[must_use]
    pub const fn is_rejected_transition(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. } | Self::AlreadyTerminal { .. }
        )
    }
}

impl From<JobError> for CollectorError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Validation(msg) => Self::Validation(msg),
            JobError::NotFound(id) => Self::not_found("Job", id),
            JobError::InvalidTransition { job_id, from, to } => Self::InvalidTransition {
                job_id: job_id.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            },
            JobError::AlreadyTerminal { job_id, status } => Self::AlreadyTerminal {
                job_id: job_id.to_string(),
                status: status.to_string(),
            },
            JobError::ShuttingDown => Self::ShuttingDown,
            JobError::Database(e) => Self::Database(e.to_string()),
            JobError::Migration(e) => Self::Database(e.to_string()),
            JobError::Configuration(msg) => Self::Configuration(msg),
            JobError::CorruptRecord { .. } | JobError::Serialization(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}
