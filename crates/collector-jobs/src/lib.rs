//! # Collector Jobs
//!
//! Job orchestration for Collector:
//! - `Job` records with a one-directional lifecycle state machine
//! - Durable job storage (SQLite, or in-memory for tests)
//! - A lifecycle controller that is the only writer of job state
//! - A bounded worker pool with FIFO admission and cooperative cancellation
//! - A cancellation watchdog and startup recovery of interrupted jobs
//!
//! # Architecture
//!
//! ```text
//!  submit ──> JobLifecycleController ──insert──> JobRecordStore
//!                    │                               ▲
//!                    ▼                               │ atomic RMW per job id
//!              JobScheduler                          │
//!   FIFO queue ──> dispatcher ──permit──> worker ────┘
//!                                          │
//!                        ProgressSink + CancellationToken
//!                                          ▼
//!                                       Scraper
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use collector_jobs::prelude::*;
//!
//! let store = Arc::new(SqliteJobStore::connect(&config.database).await?);
//! let controller = Arc::new(JobLifecycleController::from_config(store, &config.scheduler));
//! let scheduler = JobScheduler::new(controller, scrapers, (&config.scheduler).into());
//! scheduler.start()?;
//!
//! let job = scheduler.submit("https://youtu.be/dQw4w9WgXcQ", Platform::Youtube).await?;
//! ```

pub mod error;
pub mod job;
pub mod lifecycle;
pub mod metrics;
pub mod scheduler;
pub mod scraper;
pub mod store;

pub use error::{JobError, JobResult};
pub use job::{validate_url, Job, JobStatus, Platform};
pub use lifecycle::{
    JobLifecycleController, JobView, RecoveryReport, DEFAULT_MAX_RETRIES, INTERRUPTED_OPERATION,
    UNKNOWN_ERROR_MESSAGE,
};
pub use metrics::{register_metrics, JobMetrics, WorkerMetrics};
pub use scheduler::{
    JobScheduler, SchedulerSettings, SchedulerStats, ShutdownReport, CANCEL_TIMEOUT_MESSAGE,
};
pub use scraper::{ProgressSink, ScrapeOutcome, ScrapeRequest, ScrapedFile, Scraper, ScraperRegistry};
pub use store::{
    InMemoryJobStore, JobFilter, JobMutation, JobRecordStore, JobStatistics, SortOrder,
    SqliteJobStore,
};

pub use collector_core::JobId;
pub use tokio_util::sync::CancellationToken;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::job::{Job, JobStatus, Platform};
    pub use crate::lifecycle::JobLifecycleController;
    pub use crate::scheduler::JobScheduler;
    pub use crate::scraper::{ProgressSink, ScrapeOutcome, ScrapeRequest, Scraper, ScraperRegistry};
    pub use crate::store::{InMemoryJobStore, JobFilter, JobRecordStore, SqliteJobStore};
    pub use crate::{CancellationToken, JobError, JobId, JobResult};
}
