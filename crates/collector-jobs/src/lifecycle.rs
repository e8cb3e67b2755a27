//! Job lifecycle controller.
//!
//! Owns the state machine: every status change, progress report, and retry
//! goes through here and lands in the [`JobRecordStore`] as one atomic
//! read-modify-write. The controller also keeps the per-job cancellation
//! tokens shared with running scrapers.

use chrono::{Duration as ChronoDuration, Utc};
use collector_config::SchedulerConfig;
use collector_core::JobId;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{JobError, JobResult};
use crate::job::{validate_url, Job, JobStatus, Platform};
use crate::metrics::JobMetrics;
use crate::store::{JobFilter, JobRecordStore, JobStatistics};

/// Fallback message when a failure carries no text.
pub const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error";

/// Label written when shutdown reverts a running job.
pub const INTERRUPTED_OPERATION: &str = "Interrupted by shutdown";

/// Default retry ceiling per lineage.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Externally visible job state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: Job,
    pub is_active: bool,
    pub can_cancel: bool,
    pub can_retry: bool,
}

/// Outcome of reconciling jobs left active by a previous process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Running jobs reverted to pending.
    pub requeued: usize,
    /// Cancelling jobs finalised as cancelled.
    pub cancelled: usize,
}

/// The job state machine.
pub struct JobLifecycleController {
    store: Arc<dyn JobRecordStore>,
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
    max_retries: u32,
}

impl JobLifecycleController {
    /// Creates a controller over `store`.
    pub fn new(store: Arc<dyn JobRecordStore>, max_retries: u32) -> Self {
        Self {
            store,
            tokens: Mutex::new(HashMap::new()),
            max_retries,
        }
    }

    /// Creates a controller using the scheduler retry limit.
    pub fn from_config(store: Arc<dyn JobRecordStore>, config: &SchedulerConfig) -> Self {
        Self::new(store, config.max_retries)
    }

    /// Returns the backing store.
    pub fn store(&self) -> &Arc<dyn JobRecordStore> {
        &self.store
    }

    /// Retry ceiling per lineage.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Creates a `pending` job after validating the URL against `platform`.
    pub async fn submit(&self, url: &str, platform: Platform) -> JobResult<Job> {
        validate_url(url, platform)?;

        let job = Job::new(url.trim(), platform);
        self.store.insert(&job).await?;
        JobMetrics::job_submitted(platform);

        info!(job_id = %job.id, platform = %platform, url = %job.url, "Job submitted");
        Ok(job)
    }

    /// Fetches a job or fails with `NotFound`.
    pub async fn get(&self, id: &JobId) -> JobResult<Job> {
        self.store.get(id).await?.ok_or(JobError::NotFound(*id))
    }

    /// Jobs matching `filter`.
    pub async fn list(&self, filter: &JobFilter) -> JobResult<Vec<Job>> {
        self.store.find(filter).await
    }

    /// The `limit` most recent jobs.
    pub async fn recent(&self, limit: usize) -> JobResult<Vec<Job>> {
        self.store.recent(limit).await
    }

    /// Counts per status.
    pub async fn statistics(&self) -> JobResult<JobStatistics> {
        self.store.statistics().await
    }

    /// Builds the host-facing view of `job`.
    pub fn view(&self, job: Job) -> JobView {
        JobView {
            is_active: job.status.is_active(),
            can_cancel: matches!(job.status, JobStatus::Pending | JobStatus::Running),
            can_retry: self.can_retry(&job),
            job,
        }
    }

    /// Whether `retry` would create a new job for `job`.
    pub fn can_retry(&self, job: &Job) -> bool {
        job.status == JobStatus::Failed && job.retry_count < self.max_retries
    }

    /// Moves a pending job to `running` when a worker actually starts it.
    pub async fn mark_running(&self, id: &JobId) -> JobResult<Job> {
        let job = self
            .store
            .update(
                id,
                Box::new(|job| {
                    job.transition(JobStatus::Running)?;
                    job.started_at = Some(job.updated_at);
                    job.progress = 0;
                    job.current_operation = Some("Starting".to_string());
                    Ok(())
                }),
            )
            .await?;

        if let Ok(wait) = (job.updated_at - job.created_at).to_std() {
            JobMetrics::job_wait_time(job.platform, wait);
        }
        debug!(job_id = %id, "Job running");
        Ok(job)
    }

    /// Records progress for a running job.
    ///
    /// `percent` is clamped to 0..=100 and never lowers stored progress; the
    /// operation label only follows reports that do not go backwards.
    pub async fn update_progress(&self, id: &JobId, percent: i32, operation: &str) -> JobResult<Job> {
        let clamped = u8::try_from(percent.clamp(0, 100)).unwrap_or(100);
        let operation = operation.trim().to_string();

        self.store
            .update(
                id,
                Box::new(move |job| {
                    ensure_running(job)?;
                    if clamped >= job.progress {
                        job.progress = clamped;
                        if !operation.is_empty() {
                            job.current_operation = Some(operation);
                        }
                    }
                    job.updated_at = Utc::now();
                    Ok(())
                }),
            )
            .await
    }

    /// Adds to the downloaded byte count of a running job.
    pub async fn add_bytes(&self, id: &JobId, bytes: u64) -> JobResult<Job> {
        self.store
            .update(
                id,
                Box::new(move |job| {
                    ensure_running(job)?;
                    job.bytes_downloaded = job.bytes_downloaded.saturating_add(bytes);
                    Ok(())
                }),
            )
            .await
    }

    /// Completes a running job.
    ///
    /// A job that moved to `cancelling` while the worker was finishing is
    /// confirmed as cancelled instead.
    pub async fn mark_completed(&self, id: &JobId, title: Option<String>, bytes: u64) -> JobResult<Job> {
        let job = self
            .store
            .update(
                id,
                Box::new(move |job| {
                    if job.status == JobStatus::Cancelling {
                        return confirm_cancelled(job);
                    }
                    job.transition(JobStatus::Completed)?;
                    job.progress = 100;
                    job.current_operation = Some("Completed".to_string());
                    if title.is_some() {
                        job.title = title;
                    }
                    job.bytes_downloaded = job.bytes_downloaded.max(bytes);
                    Ok(())
                }),
            )
            .await?;

        record_finished(&job);
        if job.status == JobStatus::Cancelled {
            info!(job_id = %id, "Job cancelled while completing");
        } else {
            info!(job_id = %id, bytes = job.bytes_downloaded, "Job completed");
        }
        Ok(job)
    }

    /// Fails a job with a user-facing message.
    ///
    /// As with [`mark_completed`](Self::mark_completed), an accepted cancel
    /// wins over the failure.
    pub async fn mark_failed(&self, id: &JobId, message: &str) -> JobResult<Job> {
        self.write_failure(id, message, false).await
    }

    /// Fails a job whose cancellation never completed.
    ///
    /// Only a job still in `cancelling` is touched.
    pub async fn fail_stalled_cancellation(&self, id: &JobId, message: &str) -> JobResult<Job> {
        self.write_failure(id, message, true).await
    }

    async fn write_failure(&self, id: &JobId, message: &str, stalled_cancel: bool) -> JobResult<Job> {
        let message = match message.trim() {
            "" => UNKNOWN_ERROR_MESSAGE.to_string(),
            text => text.to_string(),
        };

        let job = self
            .store
            .update(
                id,
                Box::new(move |job| {
                    match (job.status, stalled_cancel) {
                        (JobStatus::Cancelling, false) => return confirm_cancelled(job),
                        (JobStatus::Cancelling, true) => {}
                        (from, true) if !from.is_terminal() => {
                            return Err(JobError::InvalidTransition {
                                job_id: job.id,
                                from,
                                to: JobStatus::Failed,
                            });
                        }
                        _ => {}
                    }
                    job.transition(JobStatus::Failed)?;
                    job.error_message = Some(message);
                    job.current_operation = Some("Failed".to_string());
                    Ok(())
                }),
            )
            .await?;

        record_finished(&job);
        if job.status == JobStatus::Cancelled {
            info!(job_id = %id, "Job cancelled while failing");
        } else {
            warn!(job_id = %id, error = job.error_message.as_deref().unwrap_or_default(), "Job failed");
        }
        Ok(job)
    }

    /// Confirms cancellation of a job.
    pub async fn mark_cancelled(&self, id: &JobId) -> JobResult<Job> {
        let job = self.store.update(id, Box::new(confirm_cancelled)).await?;

        record_finished(&job);
        info!(job_id = %id, "Job cancelled");
        Ok(job)
    }

    /// Requests cancellation.
    ///
    /// Pending jobs are cancelled outright. Running jobs move to
    /// `cancelling` and their token is tripped; the worker confirms later.
    /// Returns false for terminal jobs, without writing anything.
    pub async fn cancel(&self, id: &JobId) -> JobResult<bool> {
        let current = self.get(id).await?;
        match current.status {
            JobStatus::Cancelling => return Ok(true),
            status if status.is_terminal() => return Ok(false),
            _ => {}
        }

        let result = self
            .store
            .update(
                id,
                Box::new(|job| {
                    if job.status == JobStatus::Pending {
                        confirm_cancelled(job)?;
                    } else {
                        job.transition(JobStatus::Cancelling)?;
                        job.current_operation = Some("Cancelling".to_string());
                    }
                    Ok(())
                }),
            )
            .await;

        match result {
            Ok(job) if job.status == JobStatus::Cancelled => {
                record_finished(&job);
                info!(job_id = %id, "Pending job cancelled");
                Ok(true)
            }
            Ok(_) => {
                if let Some(token) = self.tokens.lock().get(id) {
                    token.cancel();
                }
                info!(job_id = %id, "Cancellation requested");
                Ok(true)
            }
            Err(JobError::AlreadyTerminal { .. }) => Ok(false),
            // Another caller moved it to cancelling first.
            Err(JobError::InvalidTransition { from: JobStatus::Cancelling, .. }) => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Creates a fresh pending job from a failed one.
    ///
    /// Returns `None` when the source is not failed or its lineage has used
    /// up the retry budget. The source record is never modified.
    pub async fn retry(&self, id: &JobId) -> JobResult<Option<Job>> {
        let source = self.get(id).await?;
        if !self.can_retry(&source) {
            debug!(job_id = %id, status = %source.status, retry_count = source.retry_count, "Retry not allowed");
            return Ok(None);
        }

        let job = Job::retry_of(&source);
        self.store.insert(&job).await?;
        JobMetrics::job_submitted(job.platform);

        info!(job_id = %job.id, retry_of = %id, retry_count = job.retry_count, "Job retried");
        Ok(Some(job))
    }

    /// Reverts a job whose worker was stopped by shutdown.
    ///
    /// Running jobs go back to `pending` so they resume after restart;
    /// jobs already cancelling are finalised as cancelled.
    pub async fn mark_interrupted(&self, id: &JobId) -> JobResult<Job> {
        let job = self
            .store
            .update(
                id,
                Box::new(|job| {
                    if job.status == JobStatus::Cancelling {
                        job.transition(JobStatus::Cancelled)?;
                        job.current_operation = Some("Cancelled".to_string());
                    } else {
                        job.transition(JobStatus::Pending)?;
                        job.progress = 0;
                        job.started_at = None;
                        job.current_operation = Some(INTERRUPTED_OPERATION.to_string());
                    }
                    Ok(())
                }),
            )
            .await?;

        if job.is_terminal() {
            record_finished(&job);
        }
        info!(job_id = %id, status = %job.status, "Job interrupted");
        Ok(job)
    }

    /// Reconciles jobs left `running` or `cancelling` by a previous process.
    pub async fn recover_interrupted(&self) -> JobResult<RecoveryReport> {
        let stranded = self
            .store
            .find(&JobFilter::with_statuses([JobStatus::Running, JobStatus::Cancelling]).oldest_first())
            .await?;

        let mut report = RecoveryReport::default();
        for job in stranded {
            match self.mark_interrupted(&job.id).await {
                Ok(updated) if updated.status == JobStatus::Pending => report.requeued += 1,
                Ok(_) => report.cancelled += 1,
                Err(e) if e.is_rejected_transition() => {}
                Err(e) => return Err(e),
            }
        }

        if report != RecoveryReport::default() {
            info!(requeued = report.requeued, cancelled = report.cancelled, "Recovered interrupted jobs");
        }
        Ok(report)
    }

    /// Pending jobs in submission order.
    pub async fn pending_jobs(&self) -> JobResult<Vec<Job>> {
        self.store
            .find(&JobFilter::with_statuses([JobStatus::Pending]).oldest_first())
            .await
    }

    /// Jobs that have been `cancelling` for longer than `timeout`.
    pub async fn stalled_cancellations(&self, timeout: Duration) -> JobResult<Vec<Job>> {
        let cutoff = ChronoDuration::from_std(timeout)
            .ok()
            .and_then(|timeout| Utc::now().checked_sub_signed(timeout));

        let cancelling = self
            .store
            .find(&JobFilter::with_statuses([JobStatus::Cancelling]).oldest_first())
            .await?;
        Ok(cancelling
            .into_iter()
            .filter(|job| cutoff.is_some_and(|cutoff| job.updated_at <= cutoff))
            .collect())
    }

    /// Deletes a terminal job.
    pub async fn delete(&self, id: &JobId) -> JobResult<bool> {
        let deleted = self.store.delete(id).await?;
        if deleted {
            self.release_token(id);
            info!(job_id = %id, "Job deleted");
        }
        Ok(deleted)
    }

    /// Deletes terminal jobs created more than `days` ago.
    pub async fn purge_older_than(&self, days: u32) -> JobResult<u64> {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(days));
        let purged = self.store.delete_terminal_before(cutoff).await?;
        info!(days, purged, "Purged old jobs");
        Ok(purged)
    }

    /// Creates the cancellation token for a job about to run.
    pub fn issue_token(&self, id: JobId) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.lock().insert(id, token.clone());
        token
    }

    /// Token of a job currently owned by a worker.
    pub fn token(&self, id: &JobId) -> Option<CancellationToken> {
        self.tokens.lock().get(id).cloned()
    }

    /// Drops the token once the worker is done.
    pub fn release_token(&self, id: &JobId) {
        self.tokens.lock().remove(id);
    }
}

fn ensure_running(job: &Job) -> JobResult<()> {
    match job.status {
        JobStatus::Running => Ok(()),
        status if status.is_terminal() => Err(JobError::AlreadyTerminal {
            job_id: job.id,
            status,
        }),
        status => Err(JobError::InvalidTransition {
            job_id: job.id,
            from: status,
            to: JobStatus::Running,
        }),
    }
}

fn confirm_cancelled(job: &mut Job) -> JobResult<()> {
    job.transition(JobStatus::Cancelled)?;
    job.current_operation = Some("Cancelled".to_string());
    Ok(())
}

fn record_finished(job: &Job) {
    let duration = job
        .started_at
        .zip(job.completed_at)
        .and_then(|(start, end)| (end - start).to_std().ok())
        .unwrap_or_default();
    JobMetrics::job_finished(job.platform, job.status, duration);
}
