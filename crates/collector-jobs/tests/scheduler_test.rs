//! Integration tests for JobScheduler.
//!
//! Scrapers are scripted (see `common`) so each test controls exactly when
//! work starts, stalls, fails, or finishes.

mod common;

use collector_core::UNEXPECTED_FAILURE_MESSAGE;
use collector_jobs::prelude::*;
use collector_jobs::{SchedulerSettings, CANCEL_TIMEOUT_MESSAGE, INTERRUPTED_OPERATION};
use common::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_ceiling_holds_and_admission_is_fifo() {
    let scraper = GatedScraper::new(Platform::Youtube);
    let scheduler = scheduler(ScraperRegistry::new().with(scraper.clone()), settings(2));
    let controller = Arc::clone(scheduler.controller());

    let mut ids = Vec::new();
    for url in YOUTUBE_URLS {
        ids.push(scheduler.submit(url, Platform::Youtube).await.unwrap().id);
    }

    eventually("two jobs to start", || scraper.started().len() == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(scraper.started().len(), 2);

    let stats = controller.statistics().await.unwrap();
    assert_eq!(stats.count(JobStatus::Running), 2);
    assert_eq!(stats.count(JobStatus::Pending), 3);
    assert_eq!(scheduler.stats().active, 2);

    for expected in 3..=YOUTUBE_URLS.len() {
        scraper.release(1);
        eventually("the next job to start", || scraper.started().len() == expected).await;
        let stats = controller.statistics().await.unwrap();
        assert!(stats.count(JobStatus::Running) <= 2);
    }
    scraper.release(2);

    for id in &ids {
        let job = wait_for_status(&controller, id, JobStatus::Completed).await;
        assert_eq!(job.progress, 100);
        assert!(job.completed_at.is_some());
    }

    let started = scraper.started();
    let mut first_two = started[..2].to_vec();
    first_two.sort();
    assert_eq!(first_two, YOUTUBE_URLS[..2].to_vec());
    assert_eq!(started[2..].to_vec(), YOUTUBE_URLS[2..].to_vec());
    assert_eq!(scraper.peak(), 2);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_cancel_running_job_mid_flight() {
    let scheduler = scheduler(
        ScraperRegistry::new().with(Arc::new(CooperativeScraper(Platform::Youtube))),
        settings(2),
    );
    let controller = Arc::clone(scheduler.controller());

    let job = scheduler.submit(YOUTUBE_URLS[0], Platform::Youtube).await.unwrap();
    wait_until(&controller, &job.id, |j| j.status == JobStatus::Running && j.progress > 0)
        .await
        .unwrap();

    assert!(controller.cancel(&job.id).await.unwrap());

    let job = wait_for_status(&controller, &job.id, JobStatus::Cancelled).await;
    assert!(job.completed_at.is_some());
    assert!(job.error_message.is_none());
    assert!(job.is_consistent());

    // A cancelled job is terminal; a second request changes nothing.
    assert!(!controller.cancel(&job.id).await.unwrap());
    assert_eq!(controller.get(&job.id).await.unwrap(), job);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_cancel_queued_job_never_runs() {
    let scraper = GatedScraper::new(Platform::Youtube);
    let scheduler = scheduler(ScraperRegistry::new().with(scraper.clone()), settings(1));
    let controller = Arc::clone(scheduler.controller());

    let first = scheduler.submit(YOUTUBE_URLS[0], Platform::Youtube).await.unwrap();
    let second = scheduler.submit(YOUTUBE_URLS[1], Platform::Youtube).await.unwrap();
    eventually("first job to start", || scraper.started().len() == 1).await;

    assert!(controller.cancel(&second.id).await.unwrap());
    scraper.release(1);

    wait_for_status(&controller, &first.id, JobStatus::Completed).await;
    let second = wait_for_status(&controller, &second.id, JobStatus::Cancelled).await;
    assert!(second.started_at.is_none());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(scraper.started(), vec![YOUTUBE_URLS[0].to_string()]);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_rate_limited_failure_then_retry() {
    let scheduler = scheduler(
        ScraperRegistry::new().with(Arc::new(FailingScraper {
            platform: Platform::Instagram,
            message: "Rate limited by Instagram, try again later",
        })),
        settings(2),
    );
    let controller = Arc::clone(scheduler.controller());

    let job = scheduler.submit(INSTAGRAM_URL, Platform::Instagram).await.unwrap();
    let failed = wait_for_status(&controller, &job.id, JobStatus::Failed).await;
    assert_eq!(
        failed.error_message.as_deref(),
        Some("Rate limited by Instagram, try again later")
    );
    assert!(controller.view(failed.clone()).can_retry);

    let retry = controller.retry(&job.id).await.unwrap().unwrap();
    assert_eq!(retry.retry_count, 1);
    assert_eq!(retry.url, failed.url);
    assert_eq!(retry.platform, failed.platform);
    assert_eq!(retry.status, JobStatus::Pending);
    assert_ne!(retry.id, failed.id);

    assert_eq!(controller.get(&job.id).await.unwrap(), failed);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_scheduler_retry_runs_new_job() {
    let scheduler = scheduler(
        ScraperRegistry::new().with(Arc::new(FailingScraper {
            platform: Platform::Youtube,
            message: "Video unavailable",
        })),
        settings(1),
    );
    let controller = Arc::clone(scheduler.controller());

    let job = scheduler.submit(YOUTUBE_URLS[0], Platform::Youtube).await.unwrap();
    wait_for_status(&controller, &job.id, JobStatus::Failed).await;

    let retry = scheduler.retry(&job.id).await.unwrap().unwrap();
    let retried = wait_for_status(&controller, &retry.id, JobStatus::Failed).await;
    assert_eq!(retried.retry_count, 1);
    assert!(retried.started_at.is_some());

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_panicking_scraper_is_isolated() {
    let gated = GatedScraper::new(Platform::Instagram);
    let scheduler = scheduler(
        ScraperRegistry::new()
            .with(Arc::new(PanickingScraper(Platform::Youtube)))
            .with(gated.clone()),
        settings(2),
    );
    let controller = Arc::clone(scheduler.controller());

    let survivor = scheduler.submit(INSTAGRAM_URL, Platform::Instagram).await.unwrap();
    eventually("survivor to start", || gated.started().len() == 1).await;

    let doomed = scheduler.submit(YOUTUBE_URLS[0], Platform::Youtube).await.unwrap();
    let doomed = wait_for_status(&controller, &doomed.id, JobStatus::Failed).await;
    assert_eq!(doomed.error_message.as_deref(), Some(UNEXPECTED_FAILURE_MESSAGE));

    assert_eq!(controller.get(&survivor.id).await.unwrap().status, JobStatus::Running);
    gated.release(1);
    wait_for_status(&controller, &survivor.id, JobStatus::Completed).await;

    // The pool keeps serving work after the fault.
    let next = scheduler.submit(INSTAGRAM_URL, Platform::Instagram).await.unwrap();
    gated.release(1);
    wait_for_status(&controller, &next.id, JobStatus::Completed).await;
    assert_eq!(scheduler.stats().active, 0);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_scraper_error_becomes_generic_failure() {
    let scheduler = scheduler(
        ScraperRegistry::new().with(Arc::new(ErroringScraper(Platform::Youtube))),
        settings(1),
    );
    let controller = Arc::clone(scheduler.controller());

    let job = scheduler.submit(YOUTUBE_URLS[0], Platform::Youtube).await.unwrap();
    let job = wait_for_status(&controller, &job.id, JobStatus::Failed).await;
    assert_eq!(job.error_message.as_deref(), Some(UNEXPECTED_FAILURE_MESSAGE));
    assert!(!job.error_message.unwrap().contains("connection reset"));

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_reverts_running_jobs_to_pending() {
    let db = TestDatabase::new().await;
    let scheduler = scheduler_over(
        db.store(),
        ScraperRegistry::new().with(Arc::new(StubbornScraper(Platform::Youtube))),
        settings(1),
    );
    let controller = Arc::clone(scheduler.controller());

    let running = scheduler.submit(YOUTUBE_URLS[0], Platform::Youtube).await.unwrap();
    let queued = scheduler.submit(YOUTUBE_URLS[1], Platform::Youtube).await.unwrap();
    wait_until(&controller, &running.id, |j| j.progress >= 20).await.unwrap();

    let report = scheduler.shutdown().await;
    assert_eq!(report.interrupted, vec![running.id]);
    assert_eq!(report.drained, 0);

    let interrupted = controller.get(&running.id).await.unwrap();
    assert_eq!(interrupted.status, JobStatus::Pending);
    assert_eq!(interrupted.progress, 0);
    assert!(interrupted.started_at.is_none());
    assert!(interrupted.error_message.is_none());
    assert_eq!(interrupted.current_operation.as_deref(), Some(INTERRUPTED_OPERATION));
    assert_eq!(controller.get(&queued.id).await.unwrap().status, JobStatus::Pending);

    // A fresh process picks both up again, oldest first.
    let restarted = scheduler_over(
        db.store(),
        ScraperRegistry::new().with(Arc::new(InstantScraper(Platform::Youtube))),
        settings(1),
    );
    assert_eq!(restarted.resume_pending().await.unwrap(), 2);

    let controller = Arc::clone(restarted.controller());
    let first = wait_for_status(&controller, &running.id, JobStatus::Completed).await;
    let second = wait_for_status(&controller, &queued.id, JobStatus::Completed).await;
    assert!(first.started_at <= second.started_at);
    assert_eq!(first.bytes_downloaded, 512);

    restarted.shutdown().await;
}

#[tokio::test]
async fn test_watchdog_fails_stalled_cancellation() {
    let scheduler = scheduler(
        ScraperRegistry::new()
            .with(Arc::new(StubbornScraper(Platform::Youtube)))
            .with(Arc::new(InstantScraper(Platform::Instagram))),
        SchedulerSettings {
            cancel_timeout: Some(Duration::from_millis(50)),
            ..settings(1)
        },
    );
    let controller = Arc::clone(scheduler.controller());

    let stuck = scheduler.submit(YOUTUBE_URLS[0], Platform::Youtube).await.unwrap();
    wait_for_status(&controller, &stuck.id, JobStatus::Running).await;
    assert!(controller.cancel(&stuck.id).await.unwrap());

    let stuck = wait_for_status(&controller, &stuck.id, JobStatus::Failed).await;
    assert_eq!(stuck.error_message.as_deref(), Some(CANCEL_TIMEOUT_MESSAGE));
    assert!(stuck.is_consistent());

    // The slot held by the stuck worker is free again.
    let next = scheduler.submit(INSTAGRAM_URL, Platform::Instagram).await.unwrap();
    wait_for_status(&controller, &next.id, JobStatus::Completed).await;

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_stuck_cancellation_without_watchdog_stays_cancelling() {
    let scheduler = scheduler(
        ScraperRegistry::new().with(Arc::new(StubbornScraper(Platform::Youtube))),
        settings(1),
    );
    let controller = Arc::clone(scheduler.controller());

    let job = scheduler.submit(YOUTUBE_URLS[0], Platform::Youtube).await.unwrap();
    wait_for_status(&controller, &job.id, JobStatus::Running).await;
    controller.cancel(&job.id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(controller.get(&job.id).await.unwrap().status, JobStatus::Cancelling);

    // Shutdown finalises it instead of requeueing.
    let report = scheduler.shutdown().await;
    assert_eq!(report.interrupted, vec![job.id]);
    assert_eq!(controller.get(&job.id).await.unwrap().status, JobStatus::Cancelled);
}

async fn cancel_while_result_is_written(outcome: ScrapeOutcome) -> Job {
    let store = HeldStore::new();
    let scraper = ArmingScraper {
        platform: Platform::Youtube,
        store: Arc::clone(&store),
        outcome,
    };
    let scheduler = scheduler_over(
        store.clone(),
        ScraperRegistry::new().with(Arc::new(scraper)),
        settings(1),
    );
    let controller = Arc::clone(scheduler.controller());

    let job = scheduler.submit(YOUTUBE_URLS[0], Platform::Youtube).await.unwrap();
    store.held().await;

    // The scraper has returned; its result is not stored yet.
    assert_eq!(controller.get(&job.id).await.unwrap().status, JobStatus::Running);
    assert!(controller.cancel(&job.id).await.unwrap());
    assert_eq!(controller.get(&job.id).await.unwrap().status, JobStatus::Cancelling);
    store.release();

    let job = wait_for_status(&controller, &job.id, JobStatus::Cancelled).await;
    eventually("the worker slot to free", || scheduler.stats().active == 0).await;
    scheduler.shutdown().await;
    job
}

#[tokio::test]
async fn test_cancel_accepted_while_completing_ends_cancelled() {
    let outcome = ScrapeOutcome::completed(Some("Done".to_string()), Vec::new());
    let job = cancel_while_result_is_written(outcome).await;
    assert!(job.is_consistent());
    assert!(job.completed_at.is_some());
    assert!(job.title.is_none());
}

#[tokio::test]
async fn test_cancel_accepted_while_failing_ends_cancelled() {
    let job = cancel_while_result_is_written(ScrapeOutcome::failed("Not found")).await;
    assert!(job.is_consistent());
    assert!(job.error_message.is_none());
}
