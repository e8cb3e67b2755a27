//! Bounded worker pool.
//!
//! Jobs are admitted FIFO through an unbounded queue. A single dispatcher
//! takes one semaphore permit per job before spawning its worker, so at most
//! `max_concurrent` jobs run at once and everything behind them stays
//! visibly `pending`. Each worker owns its job id for the whole run: it marks
//! the job running, feeds the scraper a progress sink and a cancellation
//! token, and writes the terminal status. Faults inside a scraper, including
//! panics, are contained at the worker boundary.

use collector_config::SchedulerConfig;
use collector_core::{JobId, UNEXPECTED_FAILURE_MESSAGE};
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::error::{JobError, JobResult};
use crate::job::{Job, JobStatus, Platform};
use crate::lifecycle::{JobLifecycleController, UNKNOWN_ERROR_MESSAGE};
use crate::metrics::WorkerMetrics;
use crate::scraper::{ProgressDrain, ScrapeOutcome, ScrapeRequest, Scraper, ScraperRegistry};

/// Message stored on jobs the watchdog gives up on.
pub const CANCEL_TIMEOUT_MESSAGE: &str = "Cancellation did not complete in time";

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Global concurrency ceiling.
    pub max_concurrent: usize,

    /// How long shutdown waits for in-flight workers.
    pub shutdown_grace: Duration,

    /// `cancelling` jobs older than this are failed; `None` disables the watchdog.
    pub cancel_timeout: Option<Duration>,

    /// Watchdog tick.
    pub watchdog_interval: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent.max(1),
            shutdown_grace: config.shutdown_grace(),
            cancel_timeout: config.cancel_timeout(),
            watchdog_interval: config.watchdog_interval(),
        }
    }
}

/// Point-in-time scheduler counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub max_concurrent: usize,
    /// Workers currently holding a slot.
    pub active: usize,
    /// Jobs admitted but not yet dispatched.
    pub queued: usize,
    pub accepting: bool,
}

/// What shutdown did with the work it found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers that finished within the grace period.
    pub drained: usize,
    /// Jobs reverted to `pending` (or finalised if cancelling) after the grace period.
    pub interrupted: Vec<JobId>,
}

struct QueuedWork {
    job_id: JobId,
    platform: Platform,
    scraper: Option<Arc<dyn Scraper>>,
}

struct InFlight {
    handle: JoinHandle<()>,
}

/// Bounded-concurrency job scheduler.
pub struct JobScheduler {
    controller: Arc<JobLifecycleController>,
    scrapers: ScraperRegistry,
    settings: SchedulerSettings,
    queue_tx: mpsc::UnboundedSender<QueuedWork>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<QueuedWork>>>,
    queued: AtomicUsize,
    semaphore: Arc<Semaphore>,
    in_flight: Mutex<HashMap<JobId, InFlight>>,
    accepting: AtomicBool,
    stop: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
    /// Creates a scheduler. Call [`start`](Self::start) to begin dispatching.
    pub fn new(
        controller: Arc<JobLifecycleController>,
        scrapers: ScraperRegistry,
        settings: SchedulerSettings,
    ) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let max_concurrent = settings.max_concurrent.max(1);

        Arc::new(Self {
            controller,
            scrapers,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            settings: SchedulerSettings {
                max_concurrent,
                ..settings
            },
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            queued: AtomicUsize::new(0),
            in_flight: Mutex::new(HashMap::new()),
            accepting: AtomicBool::new(true),
            stop: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Returns the lifecycle controller.
    pub fn controller(&self) -> &Arc<JobLifecycleController> {
        &self.controller
    }

    /// Returns the settings in effect.
    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Starts the dispatcher and, if configured, the cancellation watchdog.
    pub fn start(self: &Arc<Self>) -> JobResult<()> {
        let Some(queue_rx) = self.queue_rx.lock().take() else {
            return Err(JobError::Configuration("Scheduler already started".to_string()));
        };

        info!(
            max_concurrent = self.settings.max_concurrent,
            scrapers = ?self.scrapers.platforms(),
            "Starting job scheduler"
        );

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(
            Arc::clone(self)
                .dispatch(queue_rx)
                .instrument(info_span!("dispatcher")),
        ));
        if let Some(timeout) = self.settings.cancel_timeout {
            tasks.push(tokio::spawn(
                Arc::clone(self)
                    .watchdog(timeout)
                    .instrument(info_span!("watchdog")),
            ));
        }

        Ok(())
    }

    /// Admits a pending job, run by the scraper registered for its platform.
    pub fn enqueue(&self, job: &Job) -> JobResult<()> {
        self.push(job, None)
    }

    /// Admits a pending job bound to a specific scraper.
    pub fn enqueue_with(&self, job: &Job, scraper: Arc<dyn Scraper>) -> JobResult<()> {
        self.push(job, Some(scraper))
    }

    fn push(&self, job: &Job, scraper: Option<Arc<dyn Scraper>>) -> JobResult<()> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(JobError::ShuttingDown);
        }
        if job.status != JobStatus::Pending {
            return Err(JobError::InvalidTransition {
                job_id: job.id,
                from: job.status,
                to: JobStatus::Running,
            });
        }

        self.queued.fetch_add(1, Ordering::SeqCst);
        let work = QueuedWork {
            job_id: job.id,
            platform: job.platform,
            scraper,
        };
        if self.queue_tx.send(work).is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(JobError::ShuttingDown);
        }

        debug!(job_id = %job.id, "Job queued");
        Ok(())
    }

    /// Submits and admits a new job.
    pub async fn submit(&self, url: &str, platform: Platform) -> JobResult<Job> {
        if !self.is_accepting() {
            return Err(JobError::ShuttingDown);
        }
        let job = self.controller.submit(url, platform).await?;
        self.enqueue(&job)?;
        Ok(job)
    }

    /// Retries a failed job and admits the new record.
    pub async fn retry(&self, id: &JobId) -> JobResult<Option<Job>> {
        if !self.is_accepting() {
            return Err(JobError::ShuttingDown);
        }
        let job = self.controller.retry(id).await?;
        if let Some(job) = &job {
            self.enqueue(job)?;
        }
        Ok(job)
    }

    /// Re-admits every pending job, oldest first.
    pub async fn resume_pending(&self) -> JobResult<usize> {
        let pending = self.controller.pending_jobs().await?;
        for job in &pending {
            self.enqueue(job)?;
        }
        if !pending.is_empty() {
            info!(count = pending.len(), "Resumed pending jobs");
        }
        Ok(pending.len())
    }

    /// Whether new work is admitted.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Current counters.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            max_concurrent: self.settings.max_concurrent,
            active: self.active_workers(),
            queued: self.queued.load(Ordering::SeqCst),
            accepting: self.is_accepting(),
        }
    }

    fn active_workers(&self) -> usize {
        self.settings.max_concurrent - self.semaphore.available_permits()
    }

    async fn dispatch(self: Arc<Self>, mut queue_rx: mpsc::UnboundedReceiver<QueuedWork>) {
        loop {
            let work = tokio::select! {
                biased;
                () = self.stop.cancelled() => break,
                work = queue_rx.recv() => match work {
                    Some(work) => work,
                    None => break,
                },
            };

            let permit = tokio::select! {
                biased;
                () = self.stop.cancelled() => break,
                permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            self.queued.fetch_sub(1, Ordering::SeqCst);
            self.spawn_worker(work, permit);
        }

        debug!("Dispatcher stopped");
    }

    fn spawn_worker(self: &Arc<Self>, work: QueuedWork, permit: OwnedSemaphorePermit) {
        let job_id = work.job_id;
        let span = info_span!("job", job_id = %job_id, platform = %work.platform);

        // Registered under the lock so a fast worker cannot deregister first.
        let mut in_flight = self.in_flight.lock();
        let handle = tokio::spawn(Arc::clone(self).run_worker(work, permit).instrument(span));
        in_flight.insert(job_id, InFlight { handle });
    }

    async fn run_worker(self: Arc<Self>, work: QueuedWork, permit: OwnedSemaphorePermit) {
        let job_id = work.job_id;
        WorkerMetrics::set_active(self.active_workers());

        let token = self.controller.issue_token(job_id);
        match self.controller.mark_running(&job_id).await {
            Ok(job) => self.execute(job, work.scraper, token).await,
            Err(e) if e.is_rejected_transition() => {
                debug!(error = %e, "Job no longer pending, skipping");
            }
            Err(e) => error!(error = %e, "Failed to start job"),
        }

        self.controller.release_token(&job_id);
        self.in_flight.lock().remove(&job_id);
        drop(permit);
        WorkerMetrics::set_active(self.active_workers());
    }

    async fn execute(&self, job: Job, scraper: Option<Arc<dyn Scraper>>, token: CancellationToken) {
        let Some(scraper) = scraper.or_else(|| self.scrapers.for_platform(job.platform)) else {
            let message = format!("No scraper is available for {}", job.platform);
            self.settle(&job.id, self.controller.mark_failed(&job.id, &message).await);
            return;
        };

        info!(url = %job.url, "Job started");
        let (sink, drain) = ProgressDrain::spawn(Arc::clone(&self.controller), job.id);
        let request = ScrapeRequest {
            job_id: job.id,
            url: job.url.clone(),
            progress: sink,
            cancel: token.clone(),
            sessions: self.scrapers.sessions(),
        };

        let result = AssertUnwindSafe(scraper.run(request)).catch_unwind().await;
        drain.finish().await;

        let id = &job.id;
        let write = match result {
            Ok(Ok(outcome)) if token.is_cancelled() || outcome.cancelled => {
                self.controller.mark_cancelled(id).await
            }
            Ok(Ok(ScrapeOutcome {
                success: true,
                title,
                bytes,
                ..
            })) => self.controller.mark_completed(id, title, bytes).await,
            Ok(Ok(outcome)) => {
                let message = outcome.error.as_deref().unwrap_or(UNKNOWN_ERROR_MESSAGE);
                self.controller.mark_failed(id, message).await
            }
            Ok(Err(e)) => {
                error!(error = ?e, "Scraper returned an unexpected error");
                self.fault(id, &token).await
            }
            Err(panic) => {
                error!(panic = %panic_message(panic.as_ref()), "Scraper panicked");
                self.fault(id, &token).await
            }
        };
        self.settle(id, write);
    }

    async fn fault(&self, id: &JobId, token: &CancellationToken) -> JobResult<Job> {
        if token.is_cancelled() {
            self.controller.mark_cancelled(id).await
        } else {
            self.controller.mark_failed(id, UNEXPECTED_FAILURE_MESSAGE).await
        }
    }

    fn settle(&self, id: &JobId, write: JobResult<Job>) {
        match write {
            Ok(_) => {}
            // The watchdog or another writer got there first.
            Err(e) if e.is_rejected_transition() => {
                debug!(job_id = %id, error = %e, "Terminal write skipped");
            }
            Err(e) => error!(job_id = %id, error = %e, "Failed to record job outcome"),
        }
    }

    async fn watchdog(self: Arc<Self>, timeout: Duration) {
        let mut interval = tokio::time::interval(self.settings.watchdog_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.stop.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.reap_stalled_cancellations(timeout).await {
                        warn!(error = %e, "Watchdog sweep failed");
                    }
                }
            }
        }
    }

    /// Fails jobs stuck in `cancelling` for longer than `timeout` and frees
    /// their worker slots. Returns how many were reaped.
    pub async fn reap_stalled_cancellations(&self, timeout: Duration) -> JobResult<usize> {
        let stalled = self.controller.stalled_cancellations(timeout).await?;

        let mut reaped = 0;
        for job in stalled {
            match self
                .controller
                .fail_stalled_cancellation(&job.id, CANCEL_TIMEOUT_MESSAGE)
                .await
            {
                Ok(_) => reaped += 1,
                Err(e) if e.is_rejected_transition() => continue,
                Err(e) => return Err(e),
            }

            if let Some(worker) = self.in_flight.lock().remove(&job.id) {
                worker.handle.abort();
            }
            self.controller.release_token(&job.id);
            warn!(job_id = %job.id, "Cancellation timed out, job failed");
        }

        if reaped > 0 {
            WorkerMetrics::set_active(self.active_workers());
        }
        Ok(reaped)
    }

    /// Stops admitting work, waits up to the grace period for in-flight
    /// workers, then reverts whatever is still running to `pending`.
    pub async fn shutdown(&self) -> ShutdownReport {
        info!("Shutting down job scheduler...");
        self.accepting.store(false, Ordering::SeqCst);
        self.stop.cancel();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        let initial = self.in_flight.lock().len();
        let deadline = Instant::now() + self.settings.shutdown_grace;
        while !self.in_flight.lock().is_empty() && Instant::now() < deadline {
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }

        let remaining: Vec<(JobId, InFlight)> = self.in_flight.lock().drain().collect();
        let mut report = ShutdownReport {
            drained: initial.saturating_sub(remaining.len()),
            interrupted: Vec::with_capacity(remaining.len()),
        };

        for (id, worker) in remaining {
            worker.handle.abort();
            let _ = worker.handle.await;
            self.controller.release_token(&id);

            match self.controller.mark_interrupted(&id).await {
                Ok(_) => report.interrupted.push(id),
                Err(e) if e.is_rejected_transition() => {}
                Err(e) => error!(job_id = %id, error = %e, "Failed to revert interrupted job"),
            }
        }

        WorkerMetrics::set_active(0);
        info!(
            drained = report.drained,
            interrupted = report.interrupted.len(),
            "Job scheduler stopped"
        );
        report
    }
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("settings", &self.settings)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryJobStore;

    fn scheduler(max_concurrent: usize) -> Arc<JobScheduler> {
        let controller = Arc::new(JobLifecycleController::new(Arc::new(InMemoryJobStore::new()), 3));
        JobScheduler::new(
            controller,
            ScraperRegistry::new(),
            SchedulerSettings {
                max_concurrent,
                ..SchedulerSettings::default()
            },
        )
    }

    #[test]
    fn test_settings_from_config() {
        let config = SchedulerConfig {
            cancel_timeout_secs: 0,
            ..SchedulerConfig::default()
        };
        let settings = SchedulerSettings::from(&config);
        assert_eq!(settings.max_concurrent, config.max_concurrent);
        assert!(settings.cancel_timeout.is_none());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }

    #[tokio::test]
    async fn test_enqueue_rejects_non_pending() {
        let scheduler = scheduler(1);
        let mut job = Job::new("https://youtu.be/a", Platform::Youtube);
        job.transition(JobStatus::Cancelled).unwrap();

        let err = scheduler.enqueue(&job).unwrap_err();
        assert!(err.is_rejected_transition());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let scheduler = scheduler(1);
        scheduler.start().unwrap();
        assert!(scheduler.start().is_err());
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_scraper_fails_job() {
        let scheduler = scheduler(1);
        scheduler.start().unwrap();
        let job = scheduler
            .submit("https://youtu.be/abc", Platform::Youtube)
            .await
            .unwrap();

        let mut stored = scheduler.controller().get(&job.id).await.unwrap();
        for _ in 0..100 {
            if stored.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            stored = scheduler.controller().get(&job.id).await.unwrap();
        }

        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(
            stored.error_message.as_deref(),
            Some("No scraper is available for youtube")
        );
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_admission() {
        let scheduler = scheduler(2);
        scheduler.start().unwrap();
        let report = scheduler.shutdown().await;
        assert_eq!(report, ShutdownReport::default());

        assert!(!scheduler.stats().accepting);
        let err = scheduler
            .submit("https://youtu.be/abc", Platform::Youtube)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::ShuttingDown));
    }
}
