//! Scraper capability contract.
//!
//! A scraper is the opaque unit of work behind a job. It receives the URL,
//! a [`ProgressSink`] bound to the job, a cancellation token, and access to
//! the stored account sessions, and returns a [`ScrapeOutcome`]. Expected remote failures (auth, rate limiting, not
//! found) must resolve to a failed outcome carrying an actionable message;
//! an `Err` or a panic is treated as an unexpected fault.

use async_trait::async_trait;
use collector_core::{Interface, JobId};
use collector_security::{SessionBundle, SessionVault};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::job::Platform;
use crate::lifecycle::JobLifecycleController;

/// Everything a scraper needs for one run.
#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub job_id: JobId,
    pub url: String,
    pub progress: ProgressSink,
    pub cancel: CancellationToken,
    pub sessions: Option<Arc<SessionVault>>,
}

impl ScrapeRequest {
    /// Stored session for `account_id`, read before the first remote call.
    ///
    /// `None` when no vault is wired, no encryption key is configured, or
    /// nothing usable is stored. Stale bundles are still returned; check them
    /// with [`SessionVault::is_fresh_now`].
    pub async fn session(&self, account_id: &str) -> Option<SessionBundle> {
        let vault = self.sessions.as_ref().filter(|vault| vault.is_enabled())?;
        match vault.load(account_id).await {
            Ok(bundle) => bundle,
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "Session lookup failed");
                None
            }
        }
    }

    /// Whether cancellation has been requested for this job.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// One file written by a scraper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedFile {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Terminal result of a scraper run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeOutcome {
    pub success: bool,
    pub title: Option<String>,
    pub bytes: u64,
    pub files: Vec<ScrapedFile>,
    pub error: Option<String>,
    /// The run stopped early because its token was tripped.
    pub cancelled: bool,
}

impl ScrapeOutcome {
    /// Successful run.
    #[must_use]
    pub fn completed(title: Option<String>, files: Vec<ScrapedFile>) -> Self {
        let bytes = files.iter().map(|f| f.bytes).sum();
        Self {
            success: true,
            title,
            bytes,
            files,
            ..Self::default()
        }
    }

    /// Expected failure with a user-facing message.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Early return after observing the cancellation token.
    #[must_use]
    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Self::default()
        }
    }
}

/// Per-platform scraper.
#[async_trait]
pub trait Scraper: Interface {
    /// Platform this scraper handles.
    fn platform(&self) -> Platform;

    /// Runs one job to a terminal outcome.
    async fn run(&self, request: ScrapeRequest) -> anyhow::Result<ScrapeOutcome>;
}

/// Scrapers keyed by platform, plus the session vault they share.
#[derive(Default, Clone)]
pub struct ScraperRegistry {
    scrapers: HashMap<Platform, Arc<dyn Scraper>>,
    sessions: Option<Arc<SessionVault>>,
}

impl ScraperRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `scraper` for its platform, replacing any previous one.
    pub fn register(&mut self, scraper: Arc<dyn Scraper>) {
        self.scrapers.insert(scraper.platform(), scraper);
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, scraper: Arc<dyn Scraper>) -> Self {
        self.register(scraper);
        self
    }

    /// Hands `vault` to every scraper run.
    #[must_use]
    pub fn with_sessions(mut self, vault: Arc<SessionVault>) -> Self {
        self.sessions = Some(vault);
        self
    }

    #[must_use]
    pub fn sessions(&self) -> Option<Arc<SessionVault>> {
        self.sessions.clone()
    }

    /// Scraper for `platform`, if one is registered.
    #[must_use]
    pub fn for_platform(&self, platform: Platform) -> Option<Arc<dyn Scraper>> {
        self.scrapers.get(&platform).cloned()
    }

    /// Registered platforms.
    #[must_use]
    pub fn platforms(&self) -> Vec<Platform> {
        Platform::ALL
            .into_iter()
            .filter(|p| self.scrapers.contains_key(p))
            .collect()
    }
}

impl std::fmt::Debug for ScraperRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScraperRegistry")
            .field("platforms", &self.platforms())
            .field("sessions", &self.sessions.is_some())
            .finish()
    }
}

#[derive(Debug)]
enum ProgressEvent {
    Progress { percent: i32, operation: String },
    Bytes(u64),
}

/// Fire-and-forget progress channel bound to one job.
///
/// Reports are applied in order by a drain task; sending never blocks and
/// never fails from the scraper's point of view.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSink {
    /// Reports percent complete and the current phase label.
    pub fn report(&self, percent: i32, operation: impl Into<String>) {
        let _ = self.tx.send(ProgressEvent::Progress {
            percent,
            operation: operation.into(),
        });
    }

    /// Adds to the job's downloaded byte count.
    pub fn add_bytes(&self, bytes: u64) {
        let _ = self.tx.send(ProgressEvent::Bytes(bytes));
    }

    /// A sink whose reports go nowhere.
    #[must_use]
    pub fn detached() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }
}

/// Background task writing a job's progress reports to the store.
pub(crate) struct ProgressDrain {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProgressDrain {
    /// Spawns the drain for `job_id` and returns the sink feeding it.
    pub(crate) fn spawn(controller: Arc<JobLifecycleController>, job_id: JobId) -> (ProgressSink, Self) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();

        let handle = tokio::spawn({
            let stop = stop.clone();
            async move {
                loop {
                    tokio::select! {
                        biased;
                        event = rx.recv() => match event {
                            Some(event) => apply(&controller, &job_id, event).await,
                            None => return,
                        },
                        () = stop.cancelled() => break,
                    }
                }
                // Flush whatever was reported before the stop.
                while let Ok(event) = rx.try_recv() {
                    apply(&controller, &job_id, event).await;
                }
            }
        });

        (ProgressSink { tx }, Self { stop, handle })
    }

    /// Flushes pending reports and waits for the drain to exit.
    pub(crate) async fn finish(self) {
        self.stop.cancel();
        let _ = self.handle.await;
    }
}

async fn apply(controller: &JobLifecycleController, job_id: &JobId, event: ProgressEvent) {
    let result = match event {
        ProgressEvent::Progress { percent, operation } => controller
            .update_progress(job_id, percent, &operation)
            .await
            .map(|_| ()),
        ProgressEvent::Bytes(bytes) => controller.add_bytes(job_id, bytes).await.map(|_| ()),
    };

    // Reports racing a cancel or terminal write are dropped.
    if let Err(e) = result {
        debug!(job_id = %job_id, error = %e, "Progress report ignored");
    }
}
