//! Common test infrastructure for scheduler and lifecycle integration tests.
//!
//! Provides a file-backed SQLite database and scripted scrapers whose
//! behaviour the tests drive step by step.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use collector_config::DatabaseConfig;
use collector_jobs::prelude::*;
use collector_jobs::{JobMutation, JobStatistics, SchedulerSettings};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};

pub const YOUTUBE_URLS: [&str; 5] = [
    "https://www.youtube.com/watch?v=aaaaaaaaaaa",
    "https://www.youtube.com/watch?v=bbbbbbbbbbb",
    "https://www.youtube.com/watch?v=ccccccccccc",
    "https://www.youtube.com/watch?v=ddddddddddd",
    "https://www.youtube.com/watch?v=eeeeeeeeeee",
];

pub const INSTAGRAM_URL: &str = "https://www.instagram.com/p/Cabc123/";

/// Test database backed by a temporary SQLite file.
pub struct TestDatabase {
    _dir: TempDir,
    store: Arc<SqliteJobStore>,
}

impl TestDatabase {
    /// Creates a fresh database with migrations applied.
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = DatabaseConfig {
            url: format!("sqlite://{}?mode=rwc", dir.path().join("jobs.db").display()),
            max_connections: 5,
            connect_timeout_secs: 5,
            run_migrations: true,
        };

        let store = SqliteJobStore::connect(&config)
            .await
            .expect("Failed to open test database");

        Self {
            _dir: dir,
            store: Arc::new(store),
        }
    }

    /// Returns the job store.
    pub fn store(&self) -> Arc<SqliteJobStore> {
        Arc::clone(&self.store)
    }
}

/// In-memory store that can hold one `update` until the test lets it through.
pub struct HeldStore {
    inner: InMemoryJobStore,
    armed: AtomicBool,
    entered: Notify,
    release: Semaphore,
}

impl HeldStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryJobStore::new(),
            armed: AtomicBool::new(false),
            entered: Notify::new(),
            release: Semaphore::new(0),
        })
    }

    /// Holds the next `update` call.
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Resolves once an armed `update` is being held.
    pub async fn held(&self) {
        self.entered.notified().await;
    }

    /// Lets the held `update` proceed.
    pub fn release(&self) {
        self.release.add_permits(1);
    }
}

#[async_trait]
impl JobRecordStore for HeldStore {
    async fn insert(&self, job: &Job) -> JobResult<()> {
        self.inner.insert(job).await
    }

    async fn get(&self, id: &JobId) -> JobResult<Option<Job>> {
        self.inner.get(id).await
    }

    async fn update<'a>(&self, id: &JobId, mutate: JobMutation<'a>) -> JobResult<Job> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            if let Ok(permit) = self.release.acquire().await {
                permit.forget();
            }
        }
        self.inner.update(id, mutate).await
    }

    async fn find(&self, filter: &JobFilter) -> JobResult<Vec<Job>> {
        self.inner.find(filter).await
    }

    async fn statistics(&self) -> JobResult<JobStatistics> {
        self.inner.statistics().await
    }

    async fn delete(&self, id: &JobId) -> JobResult<bool> {
        self.inner.delete(id).await
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> JobResult<u64> {
        self.inner.delete_terminal_before(cutoff).await
    }
}

/// Scheduler settings with short timings for tests.
pub fn settings(max_concurrent: usize) -> SchedulerSettings {
    SchedulerSettings {
        max_concurrent,
        shutdown_grace: Duration::from_millis(200),
        cancel_timeout: None,
        watchdog_interval: Duration::from_millis(20),
    }
}

/// Controller plus scheduler over an existing store.
pub fn scheduler_over(
    store: Arc<dyn JobRecordStore>,
    scrapers: ScraperRegistry,
    settings: SchedulerSettings,
) -> Arc<JobScheduler> {
    let controller = Arc::new(JobLifecycleController::new(store, 3));
    let scheduler = JobScheduler::new(controller, scrapers, settings);
    scheduler.start().expect("Failed to start scheduler");
    scheduler
}

/// Controller plus scheduler over an in-memory store.
pub fn scheduler(scrapers: ScraperRegistry, settings: SchedulerSettings) -> Arc<JobScheduler> {
    scheduler_over(Arc::new(InMemoryJobStore::new()), scrapers, settings)
}

/// Polls until `id` reaches `status`, panicking after two seconds.
pub async fn wait_for_status(controller: &JobLifecycleController, id: &JobId, status: JobStatus) -> Job {
    wait_until(controller, id, |job| job.status == status)
        .await
        .unwrap_or_else(|job| panic!("job {id} stuck in {} waiting for {status}", job.status))
}

/// Polls until `predicate` holds for `id`. Returns the last seen record on timeout.
pub async fn wait_until(
    controller: &JobLifecycleController,
    id: &JobId,
    predicate: impl Fn(&Job) -> bool,
) -> Result<Job, Job> {
    let mut job = controller.get(id).await.expect("job exists");
    for _ in 0..200 {
        if predicate(&job) {
            return Ok(job);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        job = controller.get(id).await.expect("job exists");
    }
    Err(job)
}

/// Polls until `condition` holds, panicking after two seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Blocks every run until the test hands out a permit.
///
/// Records start order and the highest number of runs seen at once.
pub struct GatedScraper {
    platform: Platform,
    gate: Semaphore,
    started: Mutex<Vec<String>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl GatedScraper {
    pub fn new(platform: Platform) -> Arc<Self> {
        Arc::new(Self {
            platform,
            gate: Semaphore::new(0),
            started: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    /// Lets `n` blocked runs finish.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Scraper for GatedScraper {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn run(&self, request: ScrapeRequest) -> anyhow::Result<ScrapeOutcome> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.started.lock().push(request.url.clone());
        request.progress.report(10, "Waiting for gate");

        let permit = self.gate.acquire().await?;
        permit.forget();

        self.running.fetch_sub(1, Ordering::SeqCst);
        request.progress.report(100, "Done");
        Ok(ScrapeOutcome::completed(Some(request.url), Vec::new()))
    }
}

/// Completes immediately.
pub struct InstantScraper(pub Platform);

#[async_trait]
impl Scraper for InstantScraper {
    fn platform(&self) -> Platform {
        self.0
    }

    async fn run(&self, request: ScrapeRequest) -> anyhow::Result<ScrapeOutcome> {
        request.progress.report(50, "Downloading");
        request.progress.add_bytes(512);
        Ok(ScrapeOutcome::completed(Some("Instant".to_string()), Vec::new()))
    }
}

/// Polls the token between small steps, reporting progress as it goes.
pub struct CooperativeScraper(pub Platform);

#[async_trait]
impl Scraper for CooperativeScraper {
    fn platform(&self) -> Platform {
        self.0
    }

    async fn run(&self, request: ScrapeRequest) -> anyhow::Result<ScrapeOutcome> {
        for step in 1..=1000 {
            if request.is_cancelled() {
                return Ok(ScrapeOutcome::cancelled());
            }
            request.progress.report(step / 10, format!("Step {step}"));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(ScrapeOutcome::completed(None, Vec::new()))
    }
}

/// Arms the store right before returning, so the worker's result write is held.
pub struct ArmingScraper {
    pub platform: Platform,
    pub store: Arc<HeldStore>,
    pub outcome: ScrapeOutcome,
}

#[async_trait]
impl Scraper for ArmingScraper {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn run(&self, _request: ScrapeRequest) -> anyhow::Result<ScrapeOutcome> {
        self.store.arm();
        Ok(self.outcome.clone())
    }
}

/// Resolves to an expected remote failure.
pub struct FailingScraper {
    pub platform: Platform,
    pub message: &'static str,
}

#[async_trait]
impl Scraper for FailingScraper {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn run(&self, request: ScrapeRequest) -> anyhow::Result<ScrapeOutcome> {
        request.progress.report(5, "Fetching metadata");
        Ok(ScrapeOutcome::failed(self.message))
    }
}

/// Panics mid-run.
pub struct PanickingScraper(pub Platform);

#[async_trait]
impl Scraper for PanickingScraper {
    fn platform(&self) -> Platform {
        self.0
    }

    async fn run(&self, _request: ScrapeRequest) -> anyhow::Result<ScrapeOutcome> {
        panic!("parser blew up on unexpected markup");
    }
}

/// Returns an error instead of an outcome.
pub struct ErroringScraper(pub Platform);

#[async_trait]
impl Scraper for ErroringScraper {
    fn platform(&self) -> Platform {
        self.0
    }

    async fn run(&self, _request: ScrapeRequest) -> anyhow::Result<ScrapeOutcome> {
        anyhow::bail!("connection reset by peer")
    }
}

/// Never looks at its token and never finishes on its own.
pub struct StubbornScraper(pub Platform);

#[async_trait]
impl Scraper for StubbornScraper {
    fn platform(&self) -> Platform {
        self.0
    }

    async fn run(&self, request: ScrapeRequest) -> anyhow::Result<ScrapeOutcome> {
        request.progress.report(20, "Downloading");
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(ScrapeOutcome::completed(None, Vec::new()))
    }
}
