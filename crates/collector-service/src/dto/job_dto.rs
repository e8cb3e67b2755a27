//! Job-related DTOs.

use chrono::{DateTime, Utc};
use collector_core::JobId;
use collector_jobs::{JobFilter, JobStatistics, JobStatus, JobView, Platform, SortOrder};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Default page size for job listings.
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Request to submit a scrape job.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmitJobRequest {
    #[validate(length(min = 1, max = 2048, message = "URL is required"))]
    pub url: String,

    /// Detected from the URL when omitted.
    pub platform: Option<Platform>,
}

impl SubmitJobRequest {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            platform: None,
        }
    }

    #[must_use]
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }
}

/// Job listing query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct JobListQuery {
    #[serde(default)]
    pub statuses: Vec<JobStatus>,

    pub platform: Option<Platform>,

    #[validate(range(min = 1, max = 500, message = "Limit must be between 1 and 500"))]
    pub limit: Option<usize>,

    #[serde(default)]
    pub offset: usize,

    #[serde(default)]
    pub oldest_first: bool,
}

impl From<&JobListQuery> for JobFilter {
    fn from(query: &JobListQuery) -> Self {
        Self {
            statuses: query.statuses.clone(),
            platform: query.platform,
            limit: Some(query.limit.unwrap_or(DEFAULT_LIST_LIMIT)),
            offset: query.offset,
            order: if query.oldest_first {
                SortOrder::OldestFirst
            } else {
                SortOrder::NewestFirst
            },
        }
    }
}

/// Job response DTO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResponse {
    pub id: JobId,
    pub url: String,
    pub platform: Platform,
    pub status: JobStatus,
    pub title: Option<String>,
    pub progress: u8,
    pub current_operation: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub retry_of: Option<JobId>,
    pub bytes_downloaded: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub can_cancel: bool,
    pub can_retry: bool,
}

impl From<JobView> for JobResponse {
    fn from(view: JobView) -> Self {
        let job = view.job;
        Self {
            id: job.id,
            url: job.url,
            platform: job.platform,
            status: job.status,
            title: job.title,
            progress: job.progress,
            current_operation: job.current_operation,
            error_message: job.error_message,
            retry_count: job.retry_count,
            retry_of: job.retry_of,
            bytes_downloaded: job.bytes_downloaded,
            created_at: job.created_at,
            updated_at: job.updated_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            is_active: view.is_active,
            can_cancel: view.can_cancel,
            can_retry: view.can_retry,
        }
    }
}

/// Job list response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobResponse>,
    pub limit: usize,
    pub offset: usize,
}

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResponse {
    pub id: JobId,
    /// False when the job had already finished.
    pub accepted: bool,
}

/// Job counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatisticsResponse {
    pub total: u64,
    pub active: u64,
    pub pending: u64,
    pub running: u64,
    pub cancelling: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl From<JobStatistics> for JobStatisticsResponse {
    fn from(stats: JobStatistics) -> Self {
        Self {
            total: stats.total,
            active: stats.active(),
            pending: stats.count(JobStatus::Pending),
            running: stats.count(JobStatus::Running),
            cancelling: stats.count(JobStatus::Cancelling),
            completed: stats.count(JobStatus::Completed),
            failed: stats.count(JobStatus::Failed),
            cancelled: stats.count(JobStatus::Cancelled),
        }
    }
}

/// Request to purge old terminal jobs.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CleanupRequest {
    #[validate(range(min = 1, max = 3650, message = "Days must be between 1 and 3650"))]
    pub older_than_days: u32,
}

/// Result of a cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub deleted: u64,
}
