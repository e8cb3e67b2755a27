//! Job service implementation.

use crate::dto::{
    CancelResponse, CleanupRequest, CleanupResponse, JobListQuery, JobListResponse, JobResponse,
    JobStatisticsResponse, SubmitJobRequest, DEFAULT_LIST_LIMIT,
};
use crate::job_service::JobService;
use async_trait::async_trait;
use collector_core::{CollectorError, CollectorResult, JobId, ValidateExt};
use collector_jobs::{JobFilter, JobLifecycleController, JobScheduler, Platform};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Job service backed by the scheduler.
pub struct JobServiceImpl {
    scheduler: Arc<JobScheduler>,
}

impl JobServiceImpl {
    /// Creates a new job service.
    pub fn new(scheduler: Arc<JobScheduler>) -> Self {
        Self { scheduler }
    }

    fn controller(&self) -> &JobLifecycleController {
        self.scheduler.controller()
    }

    fn respond(&self, job: collector_jobs::Job) -> JobResponse {
        JobResponse::from(self.controller().view(job))
    }
}

/// Picks the platform for a submission, detecting it from the URL when the
/// caller left it out.
fn resolve_platform(request: &SubmitJobRequest) -> CollectorResult<Platform> {
    if let Some(platform) = request.platform {
        return Ok(platform);
    }
    let url = Url::parse(request.url.trim())
        .map_err(|_| CollectorError::Validation(format!("Invalid URL: {}", request.url.trim())))?;
    Platform::detect(&url).ok_or_else(|| {
        CollectorError::Validation(format!("Unsupported URL: {}", request.url.trim()))
    })
}

#[async_trait]
impl JobService for JobServiceImpl {
    async fn submit(&self, request: SubmitJobRequest) -> CollectorResult<JobResponse> {
        debug!("Submitting job: {}", request.url);

        request.validate_request()?;
        let platform = resolve_platform(&request)?;

        let job = self.scheduler.submit(&request.url, platform).await?;
        Ok(self.respond(job))
    }

    async fn cancel(&self, id: JobId) -> CollectorResult<CancelResponse> {
        debug!("Cancelling job: {}", id);

        let accepted = self.controller().cancel(&id).await?;
        Ok(CancelResponse { id, accepted })
    }

    async fn retry(&self, id: JobId) -> CollectorResult<Option<JobResponse>> {
        debug!("Retrying job: {}", id);

        let job = self.scheduler.retry(&id).await?;
        Ok(job.map(|job| self.respond(job)))
    }

    async fn get(&self, id: JobId) -> CollectorResult<JobResponse> {
        let job = self.controller().get(&id).await?;
        Ok(self.respond(job))
    }

    async fn list(&self, query: JobListQuery) -> CollectorResult<JobListResponse> {
        query.validate_request()?;

        let filter = JobFilter::from(&query);
        let jobs = self.controller().list(&filter).await?;

        Ok(JobListResponse {
            jobs: jobs.into_iter().map(|job| self.respond(job)).collect(),
            limit: filter.limit.unwrap_or(DEFAULT_LIST_LIMIT),
            offset: filter.offset,
        })
    }

    async fn statistics(&self) -> CollectorResult<JobStatisticsResponse> {
        let stats = self.controller().statistics().await?;
        Ok(JobStatisticsResponse::from(stats))
    }

    async fn delete(&self, id: JobId) -> CollectorResult<bool> {
        let deleted = self.controller().delete(&id).await?;
        if deleted {
            info!("Job deleted: {}", id);
        }
        Ok(deleted)
    }

    async fn cleanup(&self, request: CleanupRequest) -> CollectorResult<CleanupResponse> {
        request.validate_request()?;

        let deleted = self.controller().purge_older_than(request.older_than_days).await?;
        Ok(CleanupResponse { deleted })
    }
}
