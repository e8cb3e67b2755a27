//! Durable job record storage.
//!
//! The store is the single source of truth for job state. Every mutation
//! goes through [`JobRecordStore::update`], a per-key atomic
//! read-modify-write, so a stale write can never overwrite a fresher one.

mod memory;
mod sqlite;

pub use memory::InMemoryJobStore;
pub use sqlite::SqliteJobStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use collector_core::{Interface, JobId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::JobResult;
use crate::job::{Job, JobStatus, Platform};

/// Mutation applied inside an atomic read-modify-write.
///
/// Returning an error aborts the write; the stored record is untouched.
pub type JobMutation<'a> = Box<dyn FnOnce(&mut Job) -> JobResult<()> + Send + 'a>;

/// Result ordering by creation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Query over job records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    /// Empty means any status.
    #[serde(default)]
    pub statuses: Vec<JobStatus>,
    pub platform: Option<Platform>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub order: SortOrder,
}

impl JobFilter {
    #[must_use]
    pub fn with_statuses(statuses: impl IntoIterator<Item = JobStatus>) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub fn oldest_first(mut self) -> Self {
        self.order = SortOrder::OldestFirst;
        self
    }

    /// In-process evaluation, shared by stores that filter in memory.
    #[must_use]
    pub fn matches(&self, job: &Job) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&job.status))
            && self.platform.map_or(true, |p| p == job.platform)
    }
}

/// Job counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatistics {
    pub total: u64,
    pub by_status: HashMap<JobStatus, u64>,
}

impl JobStatistics {
    #[must_use]
    pub fn count(&self, status: JobStatus) -> u64 {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn active(&self) -> u64 {
        self.count(JobStatus::Pending) + self.count(JobStatus::Running) + self.count(JobStatus::Cancelling)
    }

    fn from_counts(counts: impl IntoIterator<Item = (JobStatus, u64)>) -> Self {
        let mut stats = Self::default();
        for (status, count) in counts {
            *stats.by_status.entry(status).or_default() += count;
            stats.total += count;
        }
        stats
    }
}

/// Durable keyed job record store.
#[async_trait]
pub trait JobRecordStore: Interface {
    /// Inserts a new record.
    async fn insert(&self, job: &Job) -> JobResult<()>;

    /// Fetches a record by id.
    async fn get(&self, id: &JobId) -> JobResult<Option<Job>>;

    /// Atomically reads, mutates, and writes back one record.
    ///
    /// Fails with `NotFound` for unknown ids. If `mutate` fails nothing is
    /// written and its error is returned.
    async fn update<'a>(&self, id: &JobId, mutate: JobMutation<'a>) -> JobResult<Job>;

    /// Records matching `filter`.
    async fn find(&self, filter: &JobFilter) -> JobResult<Vec<Job>>;

    /// The `limit` most recently created records.
    async fn recent(&self, limit: usize) -> JobResult<Vec<Job>> {
        self.find(&JobFilter::default().limit(limit)).await
    }

    /// Counts per status.
    async fn statistics(&self) -> JobResult<JobStatistics>;

    /// Deletes a terminal record. Active records are never deleted.
    async fn delete(&self, id: &JobId) -> JobResult<bool>;

    /// Deletes terminal records created before `cutoff`.
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> JobResult<u64>;
}

/// Per-key async locks.
///
/// Entries are dropped once no guard or waiter holds them.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    entries: Mutex<HashMap<JobId, Arc<AsyncMutex<()>>>>,
}

/// Exclusive access to one key; releases and cleans up on drop.
pub struct KeyGuard<'a> {
    locks: &'a KeyedLocks,
    id: JobId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `id`.
    pub async fn lock(&self, id: JobId) -> KeyGuard<'_> {
        let entry = Arc::clone(self.entries.lock().entry(id).or_default());
        let guard = entry.lock_owned().await;
        KeyGuard {
            locks: self,
            id,
            guard: Some(guard),
        }
    }

    /// Number of keys currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        let mut entries = self.locks.entries.lock();
        self.guard.take();
        if let Some(entry) = entries.get(&self.id) {
            // Only the map itself still references the lock.
            if Arc::strong_count(entry) == 1 {
                entries.remove(&self.id);
            }
        }
    }
}
