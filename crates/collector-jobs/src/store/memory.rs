//! In-memory job store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use collector_core::JobId;
use parking_lot::Mutex;
use std::collections::HashMap;

use super::{JobFilter, JobMutation, JobRecordStore, JobStatistics, SortOrder};
use crate::error::{JobError, JobResult};
use crate::job::Job;

/// Job store backed by a mutex-guarded map.
///
/// The whole read-modify-write happens under one lock, which trivially
/// serializes writes per key.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

pub(crate) fn sort_and_page(mut jobs: Vec<Job>, filter: &JobFilter) -> Vec<Job> {
    jobs.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
    if filter.order == SortOrder::NewestFirst {
        jobs.reverse();
    }
    jobs.into_iter()
        .skip(filter.offset)
        .take(filter.limit.unwrap_or(usize::MAX))
        .collect()
}

#[async_trait]
impl JobRecordStore for InMemoryJobStore {
    async fn insert(&self, job: &Job) -> JobResult<()> {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&job.id) {
            return Err(JobError::Validation(format!("Job {} already exists", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: &JobId) -> JobResult<Option<Job>> {
        Ok(self.jobs.lock().get(id).cloned())
    }

    async fn update<'a>(&self, id: &JobId, mutate: JobMutation<'a>) -> JobResult<Job> {
        let mut jobs = self.jobs.lock();
        let stored = jobs.get_mut(id).ok_or(JobError::NotFound(*id))?;

        let mut draft = stored.clone();
        mutate(&mut draft)?;
        *stored = draft.clone();
        Ok(draft)
    }

    async fn find(&self, filter: &JobFilter) -> JobResult<Vec<Job>> {
        let matching = self
            .jobs
            .lock()
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        Ok(sort_and_page(matching, filter))
    }

    async fn statistics(&self) -> JobResult<JobStatistics> {
        let jobs = self.jobs.lock();
        Ok(JobStatistics::from_counts(
            jobs.values().map(|job| (job.status, 1)),
        ))
    }

    async fn delete(&self, id: &JobId) -> JobResult<bool> {
        let mut jobs = self.jobs.lock();
        match jobs.get(id) {
            Some(job) if job.is_terminal() => {
                jobs.remove(id);
                Ok(true)
            }
            Some(job) => Err(JobError::Validation(format!(
                "Job {id} is {} and cannot be deleted",
                job.status
            ))),
            None => Ok(false),
        }
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> JobResult<u64> {
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|_, job| !(job.is_terminal() && job.created_at < cutoff));
        Ok((before - jobs.len()) as u64)
    }
}
