//! SQLite job store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use collector_config::DatabaseConfig;
use collector_core::JobId;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use super::{JobFilter, JobMutation, JobRecordStore, JobStatistics, KeyedLocks, SortOrder};
use crate::error::{JobError, JobResult};
use crate::job::{Job, JobStatus};

const SELECT_COLUMNS: &str = "SELECT id, url, platform, status, title, progress, current_operation, \
     error_message, retry_count, retry_of, bytes_downloaded, created_at, updated_at, \
     started_at, completed_at FROM jobs";

const TERMINAL_STATUSES: &str = "('completed', 'failed', 'cancelled')";

/// Database row representation.
#[derive(Debug, FromRow)]
struct JobRow {
    id: String,
    url: String,
    platform: String,
    status: String,
    title: Option<String>,
    progress: i64,
    current_operation: Option<String>,
    error_message: Option<String>,
    retry_count: i64,
    retry_of: Option<String>,
    bytes_downloaded: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = JobError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| JobError::CorruptRecord {
            id: row.id.clone(),
            reason,
        };

        let id = JobId::parse(&row.id).map_err(|e| corrupt(format!("id: {e}")))?;
        let retry_of = row
            .retry_of
            .as_deref()
            .map(JobId::parse)
            .transpose()
            .map_err(|e| corrupt(format!("retry_of: {e}")))?;

        Ok(Self {
            id,
            platform: row.platform.parse().map_err(|_| corrupt(format!("platform {}", row.platform)))?,
            status: row.status.parse().map_err(|_| corrupt(format!("status {}", row.status)))?,
            progress: u8::try_from(row.progress.clamp(0, 100)).unwrap_or(0),
            retry_count: u32::try_from(row.retry_count).map_err(|_| corrupt("retry_count".to_string()))?,
            bytes_downloaded: u64::try_from(row.bytes_downloaded)
                .map_err(|_| corrupt("bytes_downloaded".to_string()))?,
            retry_of,
            url: row.url,
            title: row.title,
            current_operation: row.current_operation,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// SQLite-backed job store.
///
/// Read-modify-write holds an in-process lock for the job id, so writes to
/// one job are serialized. The database file is owned by a single process.
#[derive(Debug)]
pub struct SqliteJobStore {
    pool: SqlitePool,
    locks: KeyedLocks,
}

impl SqliteJobStore {
    /// Wraps an existing pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            locks: KeyedLocks::new(),
        }
    }

    /// Connects using configuration and applies migrations if enabled.
    pub async fn connect(config: &DatabaseConfig) -> JobResult<Self> {
        info!("Connecting to SQLite database...");

        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| JobError::Configuration(format!("Invalid database URL: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout())
            .connect_with(options)
            .await
            .map_err(|e| {
                warn!("Failed to connect to database: {}", e);
                JobError::Database(e)
            })?;

        let store = Self::new(pool);
        if config.run_migrations {
            store.migrate().await?;
        }

        info!("SQLite job store ready");
        Ok(store)
    }

    /// Applies the embedded migrations.
    pub async fn migrate(&self) -> JobResult<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl JobRecordStore for SqliteJobStore {
    async fn insert(&self, job: &Job) -> JobResult<()> {
        sqlx::query(
            r"
            INSERT INTO jobs (id, url, platform, status, title, progress, current_operation,
                              error_message, retry_count, retry_of, bytes_downloaded,
                              created_at, updated_at, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(job.id.to_string())
        .bind(&job.url)
        .bind(job.platform.as_str())
        .bind(job.status.as_str())
        .bind(&job.title)
        .bind(i64::from(job.progress))
        .bind(&job.current_operation)
        .bind(&job.error_message)
        .bind(i64::from(job.retry_count))
        .bind(job.retry_of.map(|id| id.to_string()))
        .bind(to_i64(job.bytes_downloaded))
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &JobId) -> JobResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Job::try_from).transpose()
    }

    async fn update<'a>(&self, id: &JobId, mutate: JobMutation<'a>) -> JobResult<Job> {
        let _guard = self.locks.lock(*id).await;

        let mut job = self.get(id).await?.ok_or(JobError::NotFound(*id))?;
        mutate(&mut job)?;

        sqlx::query(
            r"
            UPDATE jobs
            SET status = ?, title = ?, progress = ?, current_operation = ?, error_message = ?,
                bytes_downloaded = ?, updated_at = ?, started_at = ?, completed_at = ?
            WHERE id = ?
            ",
        )
        .bind(job.status.as_str())
        .bind(&job.title)
        .bind(i64::from(job.progress))
        .bind(&job.current_operation)
        .bind(&job.error_message)
        .bind(to_i64(job.bytes_downloaded))
        .bind(job.updated_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(job)
    }

    async fn find(&self, filter: &JobFilter) -> JobResult<Vec<Job>> {
        let mut query = QueryBuilder::<Sqlite>::new(SELECT_COLUMNS);
        query.push(" WHERE 1 = 1");

        if !filter.statuses.is_empty() {
            query.push(" AND status IN (");
            let mut statuses = query.separated(", ");
            for status in &filter.statuses {
                statuses.push_bind(status.as_str());
            }
            statuses.push_unseparated(")");
        }
        if let Some(platform) = filter.platform {
            query.push(" AND platform = ").push_bind(platform.as_str());
        }

        query.push(match filter.order {
            SortOrder::NewestFirst => " ORDER BY created_at DESC, id DESC",
            SortOrder::OldestFirst => " ORDER BY created_at ASC, id ASC",
        });

        let limit = filter
            .limit
            .map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        query
            .push(" LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(i64::try_from(filter.offset).unwrap_or(i64::MAX));

        let rows = query.build_query_as::<JobRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn statistics(&self) -> JobResult<JobStatistics> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = Vec::with_capacity(rows.len());
        for (status, count) in rows {
            let status = JobStatus::from_str(&status).map_err(|_| JobError::CorruptRecord {
                id: "*".to_string(),
                reason: format!("status {status}"),
            })?;
            counts.push((status, u64::try_from(count).unwrap_or(0)));
        }
        Ok(JobStatistics::from_counts(counts))
    }

    async fn delete(&self, id: &JobId) -> JobResult<bool> {
        let _guard = self.locks.lock(*id).await;

        let Some(job) = self.get(id).await? else {
            return Ok(false);
        };
        if !job.is_terminal() {
            return Err(JobError::Validation(format!(
                "Job {id} is {} and cannot be deleted",
                job.status
            )));
        }

        let result = sqlx::query(&format!(
            "DELETE FROM jobs WHERE id = ? AND status IN {TERMINAL_STATUSES}"
        ))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> JobResult<u64> {
        let result = sqlx::query(&format!(
            "DELETE FROM jobs WHERE status IN {TERMINAL_STATUSES} AND created_at < ?"
        ))
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
