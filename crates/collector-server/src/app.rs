//! Application builder and runtime wiring.

use collector_config::AppConfig;
use collector_core::{CollectorError, CollectorResult};
use collector_jobs::{
    JobLifecycleController, JobRecordStore, JobScheduler, Scraper, ScraperRegistry,
    SchedulerSettings, ShutdownReport, SqliteJobStore,
};
use collector_resilience::RateGate;
use collector_security::{SessionStore, SessionVault};
use collector_service::{JobService, JobServiceImpl, SessionService, SessionServiceImpl};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// What happened to persisted jobs when the application started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartupReport {
    /// Jobs left running by a crash, reverted to pending.
    pub requeued: usize,
    /// Jobs left cancelling by a crash, finalised as cancelled.
    pub cancelled: usize,
    /// Pending jobs handed back to the scheduler.
    pub resumed: usize,
}

/// Application builder for constructing the server.
pub struct AppBuilder {
    config: AppConfig,
    rate_gate: Arc<RateGate>,
    scrapers: ScraperRegistry,
    job_store: Option<Arc<dyn JobRecordStore>>,
    session_store: Option<Arc<dyn SessionStore>>,
}

impl AppBuilder {
    /// Creates a new application builder.
    pub fn new(config: AppConfig) -> Self {
        let rate_gate = Arc::new(RateGate::from_config(&config.rate_gate));
        Self {
            config,
            rate_gate,
            scrapers: ScraperRegistry::new(),
            job_store: None,
            session_store: None,
        }
    }

    /// The process-wide rate gate scrapers should pace their requests with.
    pub fn rate_gate(&self) -> Arc<RateGate> {
        Arc::clone(&self.rate_gate)
    }

    /// Registers the scraper for its platform.
    ///
    /// Each run can read stored sessions through
    /// [`ScrapeRequest::session`](collector_jobs::ScrapeRequest::session).
    #[must_use]
    pub fn with_scraper(mut self, scraper: Arc<dyn Scraper>) -> Self {
        self.scrapers.register(scraper);
        self
    }

    /// Uses `store` instead of the configured SQLite database.
    #[must_use]
    pub fn with_job_store(mut self, store: Arc<dyn JobRecordStore>) -> Self {
        self.job_store = Some(store);
        self
    }

    /// Uses `store` instead of the configured sessions directory.
    #[must_use]
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    /// Opens the stores and wires every component.
    pub async fn build(self) -> CollectorResult<Application> {
        let config = self.config;

        let (job_store, database): (Arc<dyn JobRecordStore>, _) = match self.job_store {
            Some(store) => (store, None),
            None => {
                if let Some(dir) = database_dir(&config.database.url) {
                    tokio::fs::create_dir_all(&dir).await.map_err(|e| {
                        CollectorError::Configuration(format!(
                            "Cannot create database directory {}: {e}",
                            dir.display()
                        ))
                    })?;
                }
                let sqlite = Arc::new(SqliteJobStore::connect(&config.database).await?);
                (Arc::clone(&sqlite) as Arc<dyn JobRecordStore>, Some(sqlite))
            }
        };

        let vault = match self.session_store {
            Some(store) => SessionVault::new(store, config.vault.key(), config.vault.max_age())?,
            None => SessionVault::from_config(&config.vault).await?,
        };
        let vault = Arc::new(vault);
        if !vault.is_enabled() {
            warn!("No session encryption key configured; session uploads are disabled");
        }

        let controller = Arc::new(JobLifecycleController::from_config(job_store, &config.scheduler));
        let scheduler = JobScheduler::new(
            controller,
            self.scrapers.with_sessions(Arc::clone(&vault)),
            SchedulerSettings::from(&config.scheduler),
        );

        let job_service: Arc<dyn JobService> = Arc::new(JobServiceImpl::new(Arc::clone(&scheduler)));
        let session_service: Arc<dyn SessionService> =
            Arc::new(SessionServiceImpl::new(Arc::clone(&vault)));

        Ok(Application {
            config,
            scheduler,
            vault,
            rate_gate: self.rate_gate,
            job_service,
            session_service,
            database,
        })
    }
}

/// Directory that must exist before SQLite can create the database file.
fn database_dir(url: &str) -> Option<PathBuf> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path.starts_with(":memory:") {
        return None;
    }
    Path::new(path)
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(PathBuf::from)
}

/// Wired application.
pub struct Application {
    config: AppConfig,
    scheduler: Arc<JobScheduler>,
    vault: Arc<SessionVault>,
    rate_gate: Arc<RateGate>,
    job_service: Arc<dyn JobService>,
    session_service: Arc<dyn SessionService>,
    database: Option<Arc<SqliteJobStore>>,
}

impl Application {
    /// Recovers interrupted jobs, starts the scheduler, and re-admits pending work.
    pub async fn start(&self) -> CollectorResult<StartupReport> {
        let recovery = self.scheduler.controller().recover_interrupted().await?;
        self.scheduler.start()?;
        let resumed = self.scheduler.resume_pending().await?;

        let report = StartupReport {
            requeued: recovery.requeued,
            cancelled: recovery.cancelled,
            resumed,
        };
        info!(
            requeued = report.requeued,
            cancelled = report.cancelled,
            resumed = report.resumed,
            "Application started"
        );
        Ok(report)
    }

    /// Stops admitting work, drains workers, and closes the database.
    pub async fn shutdown(&self) -> ShutdownReport {
        let report = self.scheduler.shutdown().await;
        if let Some(database) = &self.database {
            database.close().await;
        }
        info!(
            drained = report.drained,
            interrupted = report.interrupted.len(),
            "Application stopped"
        );
        report
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    pub fn vault(&self) -> &Arc<SessionVault> {
        &self.vault
    }

    pub fn rate_gate(&self) -> &Arc<RateGate> {
        &self.rate_gate
    }

    /// Host-facing job operations.
    pub fn job_service(&self) -> Arc<dyn JobService> {
        Arc::clone(&self.job_service)
    }

    /// Host-facing session operations.
    pub fn session_service(&self) -> Arc<dyn SessionService> {
        Arc::clone(&self.session_service)
    }
}
