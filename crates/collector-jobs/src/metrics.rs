//! Metrics for job throughput and worker utilisation.
//!
//! Recorded through the `metrics` facade; installing an exporter is left to
//! the host.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

use crate::job::{JobStatus, Platform};

/// Metric names for the job subsystem.
pub mod names {
    /// Total jobs accepted by submit or retry.
    pub const JOBS_SUBMITTED_TOTAL: &str = "collector_jobs_submitted_total";
    /// Total jobs that reached a terminal status, labelled by status.
    pub const JOBS_FINISHED_TOTAL: &str = "collector_jobs_finished_total";
    /// Scraper execution time in seconds.
    pub const JOB_DURATION_SECONDS: &str = "collector_job_duration_seconds";
    /// Time between creation and start in seconds.
    pub const JOB_WAIT_SECONDS: &str = "collector_job_wait_seconds";
    /// Workers currently executing a job.
    pub const WORKERS_ACTIVE: &str = "collector_workers_active";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        names::JOBS_SUBMITTED_TOTAL,
        "Total number of jobs accepted"
    );
    describe_counter!(
        names::JOBS_FINISHED_TOTAL,
        "Total number of jobs that reached a terminal status"
    );
    describe_histogram!(
        names::JOB_DURATION_SECONDS,
        "Scraper execution duration in seconds"
    );
    describe_histogram!(
        names::JOB_WAIT_SECONDS,
        "Time a job spent pending before a worker picked it up"
    );
    describe_gauge!(
        names::WORKERS_ACTIVE,
        "Number of workers executing a job"
    );
    describe_histogram!(
        collector_resilience::RATE_GATE_DELAY_SECONDS,
        "Time spent waiting on the rate gate in seconds"
    );
}

/// Job metrics recorder.
#[derive(Clone)]
pub struct JobMetrics;

impl JobMetrics {
    /// Record a job accepted.
    pub fn job_submitted(platform: Platform) {
        counter!(
            names::JOBS_SUBMITTED_TOTAL,
            "platform" => platform.as_str()
        )
        .increment(1);
    }

    /// Record a job finished with `status`.
    pub fn job_finished(platform: Platform, status: JobStatus, duration: Duration) {
        counter!(
            names::JOBS_FINISHED_TOTAL,
            "platform" => platform.as_str(),
            "status" => status.as_str()
        )
        .increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "platform" => platform.as_str(),
            "status" => status.as_str()
        )
        .record(duration.as_secs_f64());
    }

    /// Record how long a job waited in the queue.
    pub fn job_wait_time(platform: Platform, wait_time: Duration) {
        histogram!(
            names::JOB_WAIT_SECONDS,
            "platform" => platform.as_str()
        )
        .record(wait_time.as_secs_f64());
    }
}

/// Worker metrics recorder.
#[derive(Clone)]
pub struct WorkerMetrics;

impl WorkerMetrics {
    /// Update the active worker gauge.
    pub fn set_active(active: usize) {
        gauge!(names::WORKERS_ACTIVE).set(active as f64);
    }
}
