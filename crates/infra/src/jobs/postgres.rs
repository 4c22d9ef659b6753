//! Postgres-backed job store.
//!
//! ## Claiming
//!
//! `claim_next` is one statement:
//!
//! ```sql
//! UPDATE jobs SET status = 'running', attempts = attempts + 1, ...
//! WHERE id = (SELECT id FROM jobs WHERE status = 'queued'
//!             ORDER BY created_at, id LIMIT 1 FOR UPDATE SKIP LOCKED)
//! RETURNING ...
//! ```
//!
//! The row lock plus `SKIP LOCKED` means two workers polling at the same
//! time never receive the same row, so any number of worker processes may
//! share one table.
//!
//! ## Fencing
//!
//! Every `record_*` statement carries `AND status = 'running' AND attempts = $n`.
//! A handler finishing after its job was cancelled, retried or reaped updates
//! zero rows and gets `Recorded::Superseded`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | JobStoreError |
//! |------------|----------------------|---------------|
//! | Database (check violation) | `23514` | `Validation` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / Io / other | N/A | `Storage` |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::instrument;

use docket_core::{Job, JobFilter, JobId, JobStats, JobStatus, NewJob};

use super::store::{JobStore, JobStoreError, Recorded, STALE_ERROR};

const SCHEMA: &str = include_str!("../../migrations/0001_create_jobs.sql");

const JOB_COLUMNS: &str = r#"
    id, job_type, payload, status, attempts, max_attempts, result, error,
    progress, created_at, updated_at, started_at, finished_at
"#;

/// Postgres-backed job store.
///
/// Uses the SQLx connection pool, which is `Send + Sync`; clone freely.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, JobStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the `jobs` table and its indexes if missing.
    pub async fn migrate(&self) -> Result<(), JobStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    /// Distinguish a fenced-out write from a missing row.
    async fn superseded_or_missing(&self, id: JobId) -> Result<Recorded, JobStoreError> {
        let exists = sqlx::query("SELECT 1 FROM jobs WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("record", e))?;

        match exists {
            Some(_) => Ok(Recorded::Superseded),
            None => Err(JobStoreError::NotFound(id)),
        }
    }

    async fn fenced_update(
        &self,
        operation: &str,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
        id: JobId,
    ) -> Result<Recorded, JobStoreError> {
        let row = query
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        match row {
            Some(row) => Ok(Recorded::Applied(read_status(&row)?)),
            None => self.superseded_or_missing(id).await,
        }
    }
}

#[async_trait::async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, new_job), fields(job_type = %new_job.job_type()), err)]
    async fn create(&self, new_job: NewJob) -> Result<Job, JobStoreError> {
        let sql = format!(
            "INSERT INTO jobs (job_type, payload, max_attempts) VALUES ($1, $2, $3) RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(new_job.job_type())
            .bind(new_job.payload())
            .bind(to_i32(new_job.max_attempts()))
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create", e))?;

        row_to_job(&row)
    }

    #[instrument(skip(self), err)]
    async fn claim_next(&self) -> Result<Option<Job>, JobStoreError> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'running',
                attempts = attempts + 1,
                progress = NULL,
                started_at = NOW(),
                updated_at = NOW()
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'queued'
                ORDER BY created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("claim_next", e))?;

        row.as_ref().map(row_to_job).transpose()
    }

    #[instrument(skip(self, result), err)]
    async fn record_success(
        &self,
        id: JobId,
        attempt: u32,
        result: JsonValue,
    ) -> Result<Recorded, JobStoreError> {
        let query = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'succeeded',
                result = $3,
                error = NULL,
                progress = 100,
                updated_at = NOW(),
                finished_at = NOW()
            WHERE id = $1 AND status = 'running' AND attempts = $2
            RETURNING status
            "#,
        )
        .bind(id.get())
        .bind(to_i32(attempt))
        .bind(result);

        self.fenced_update("record_success", query, id).await
    }

    #[instrument(skip(self), err)]
    async fn record_failure(
        &self,
        id: JobId,
        attempt: u32,
        error: &str,
        max_attempts: u32,
    ) -> Result<Recorded, JobStoreError> {
        let query = sqlx::query(
            r#"
            UPDATE jobs
            SET error = $3,
                updated_at = NOW(),
                status = CASE WHEN attempts < $4 THEN 'queued' ELSE 'failed' END,
                finished_at = CASE WHEN attempts < $4 THEN NULL ELSE NOW() END
            WHERE id = $1 AND status = 'running' AND attempts = $2
            RETURNING status
            "#,
        )
        .bind(id.get())
        .bind(to_i32(attempt))
        .bind(error)
        .bind(to_i32(max_attempts));

        self.fenced_update("record_failure", query, id).await
    }

    async fn record_progress(
        &self,
        id: JobId,
        attempt: u32,
        progress: u8,
    ) -> Result<Recorded, JobStoreError> {
        let query = sqlx::query(
            r#"
            UPDATE jobs
            SET progress = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'running' AND attempts = $2
            RETURNING status
            "#,
        )
        .bind(id.get())
        .bind(to_i32(attempt))
        .bind(i16::from(progress.min(100)));

        self.fenced_update("record_progress", query, id).await
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_id", e))?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn list(
        &self,
        filter: &JobFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Job>, JobStoreError> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE ($1::text IS NULL OR status = $1)
                AND ($2::text IS NULL OR job_type = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.job_type.as_deref())
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list", e))?;

        rows.iter().map(row_to_job).collect()
    }

    async fn count(&self, filter: &JobFilter) -> Result<u64, JobStoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM jobs
            WHERE ($1::text IS NULL OR status = $1)
                AND ($2::text IS NULL OR job_type = $2)
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.job_type.as_deref())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count", e))?;

        let total: i64 = row
            .try_get("total")
            .map_err(|e| JobStoreError::Storage(format!("failed to read count: {e}")))?;
        Ok(total.max(0) as u64)
    }

    #[instrument(skip(self), err)]
    async fn retry(&self, id: JobId) -> Result<Job, JobStoreError> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'queued',
                error = NULL,
                result = NULL,
                progress = NULL,
                finished_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {JOB_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("retry", e))?;

        match row {
            Some(row) => row_to_job(&row),
            None => Err(JobStoreError::NotFound(id)),
        }
    }

    #[instrument(skip(self), err)]
    async fn cancel(&self, id: JobId) -> Result<Job, JobStoreError> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'failed',
                error = 'cancelled',
                updated_at = NOW(),
                finished_at = NOW()
            WHERE id = $1 AND status IN ('queued', 'running')
            RETURNING {JOB_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("cancel", e))?;

        if let Some(row) = row {
            return row_to_job(&row);
        }

        match self.find_by_id(id).await? {
            Some(job) => Err(JobStoreError::AlreadyTerminal {
                id,
                status: job.status,
            }),
            None => Err(JobStoreError::NotFound(id)),
        }
    }

    #[instrument(skip(self), err)]
    async fn requeue_stale(&self, stale_before: DateTime<Utc>) -> Result<Vec<JobId>, JobStoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE jobs
            SET error = $2,
                updated_at = NOW(),
                status = CASE WHEN attempts < max_attempts THEN 'queued' ELSE 'failed' END,
                finished_at = CASE WHEN attempts < max_attempts THEN NULL ELSE NOW() END
            WHERE status = 'running' AND updated_at < $1
            RETURNING id
            "#,
        )
        .bind(stale_before)
        .bind(STALE_ERROR)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("requeue_stale", e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<i64, _>("id")
                    .map(JobId::new)
                    .map_err(|e| JobStoreError::Storage(format!("failed to read id: {e}")))
            })
            .collect()
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS total FROM jobs GROUP BY status")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = JobStats::default();
        for row in rows {
            let status = read_status(&row)?;
            let total: i64 = row
                .try_get("total")
                .map_err(|e| JobStoreError::Storage(format!("failed to read count: {e}")))?;
            stats.add(status, total.max(0) as u64);
        }
        Ok(stats)
    }
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn read_status(row: &PgRow) -> Result<JobStatus, JobStoreError> {
    let raw: String = row
        .try_get("status")
        .map_err(|e| JobStoreError::Storage(format!("failed to read status: {e}")))?;
    raw.parse()
        .map_err(|e| JobStoreError::Storage(format!("corrupt status column: {e}")))
}

fn row_to_job(row: &PgRow) -> Result<Job, JobStoreError> {
    let column = |e: sqlx::Error| JobStoreError::Storage(format!("failed to decode job row: {e}"));

    let attempts: i32 = row.try_get("attempts").map_err(column)?;
    let max_attempts: i32 = row.try_get("max_attempts").map_err(column)?;
    let progress: Option<i16> = row.try_get("progress").map_err(column)?;

    Ok(Job {
        id: JobId::new(row.try_get("id").map_err(column)?),
        job_type: row.try_get("job_type").map_err(column)?,
        payload: row.try_get("payload").map_err(column)?,
        status: read_status(row)?,
        attempts: attempts.max(0) as u32,
        max_attempts: max_attempts.max(1) as u32,
        result: row.try_get("result").map_err(column)?,
        error: row.try_get("error").map_err(column)?,
        progress: progress.map(|p| p.clamp(0, 100) as u8),
        created_at: row.try_get("created_at").map_err(column)?,
        updated_at: row.try_get("updated_at").map_err(column)?,
        started_at: row.try_get("started_at").map_err(column)?,
        finished_at: row.try_get("finished_at").map_err(column)?,
    })
}

/// Map SQLx errors to `JobStoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Check constraint violation
                Some("23514") => JobStoreError::Validation(msg),
                _ => JobStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => JobStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// These run only when `TEST_DATABASE_URL` points at a disposable database.
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> Option<PostgresJobStore> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let store = PostgresJobStore::connect(&url, 5).await.ok()?;
        store.migrate().await.ok()?;
        sqlx::query("TRUNCATE jobs RESTART IDENTITY")
            .execute(&*store.pool)
            .await
            .ok()?;
        Some(store)
    }

    #[tokio::test]
    async fn claim_is_exclusive_and_ordered() {
        let Some(store) = store().await else { return };

        let a = store.create(NewJob::new("a", json!({})).unwrap()).await.unwrap();
        let b = store.create(NewJob::new("b", json!({})).unwrap()).await.unwrap();

        let (first, second) = tokio::join!(store.claim_next(), store.claim_next());
        let mut ids = vec![first.unwrap().unwrap().id, second.unwrap().unwrap().id];
        ids.sort();
        assert_eq!(ids, vec![a.id, b.id]);
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fenced_writes_and_cancel() {
        let Some(store) = store().await else { return };

        let job = store
            .create(NewJob::new("test", json!({})).unwrap().with_max_attempts(2).unwrap())
            .await
            .unwrap();
        let claimed = store.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.attempts, 1);

        let outcome = store.record_failure(job.id, 1, "boom", 2).await.unwrap();
        assert_eq!(outcome, Recorded::Applied(JobStatus::Queued));

        let claimed = store.claim_next().await.unwrap().unwrap();
        store.cancel(job.id).await.unwrap();
        let late = store
            .record_success(job.id, claimed.attempts, json!({}))
            .await
            .unwrap();
        assert_eq!(late, Recorded::Superseded);

        assert!(matches!(
            store.cancel(job.id).await,
            Err(JobStoreError::AlreadyTerminal { status: JobStatus::Failed, .. })
        ));
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
    }
}
