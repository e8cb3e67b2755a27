//! Job service trait definition.

use crate::dto::{
    CancelResponse, CleanupRequest, CleanupResponse, JobListQuery, JobListResponse, JobResponse,
    JobStatisticsResponse, SubmitJobRequest,
};
use async_trait::async_trait;
use collector_core::{CollectorResult, Interface, JobId};

/// Host-facing job operations.
#[async_trait]
pub trait JobService: Interface + Send + Sync {
    /// Validates and admits a new job.
    async fn submit(&self, request: SubmitJobRequest) -> CollectorResult<JobResponse>;

    /// Requests cancellation. `accepted` is false for finished jobs.
    async fn cancel(&self, id: JobId) -> CollectorResult<CancelResponse>;

    /// Creates a fresh attempt for a failed job. `None` when not retryable.
    async fn retry(&self, id: JobId) -> CollectorResult<Option<JobResponse>>;

    /// Gets a job by ID.
    async fn get(&self, id: JobId) -> CollectorResult<JobResponse>;

    /// Lists jobs matching the query.
    async fn list(&self, query: JobListQuery) -> CollectorResult<JobListResponse>;

    /// Counts jobs by status.
    async fn statistics(&self) -> CollectorResult<JobStatisticsResponse>;

    /// Deletes a finished job.
    async fn delete(&self, id: JobId) -> CollectorResult<bool>;

    /// Purges finished jobs older than the requested age.
    async fn cleanup(&self, request: CleanupRequest) -> CollectorResult<CleanupResponse>;
}
