//! Relational queue backend backed by SQLite.
//!
//! Two tables hold live and failed records. Reservation uses a conditional
//! update keyed on `reserved_at IS NULL`, so concurrent workers racing for
//! the same row are serialized by the database: the loser's update affects
//! zero rows and the pop retries with the next candidate.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use super::{QueueBackend, QueueError};
use crate::config::{DatabaseAdapter, DatabaseConfig};
use crate::core::payload::JobPayload;
use crate::core::record::{now_unix, FailedJob, JobRecord};
use crate::core::types::JobId;

/// SQLite-backed queue storage.
pub struct DatabaseQueue {
    pool: SqlitePool,
    retry_after: Duration,
}

impl DatabaseQueue {
    /// Open (or create) a database file and run migrations.
    pub async fn new(path: impl AsRef<Path>, retry_after: Duration) -> Result<Self, QueueError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| QueueError::Database(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let queue = Self { pool, retry_after };
        queue.run_migrations().await?;
        Ok(queue)
    }

    /// Create an in-memory database (useful for testing).
    pub async fn in_memory(retry_after: Duration) -> Result<Self, QueueError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| QueueError::Database(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let queue = Self { pool, retry_after };
        queue.run_migrations().await?;
        Ok(queue)
    }

    /// Build a backend from the application's database configuration.
    ///
    /// Only the `sqlite` adapter is wired; `mysql`/`pgsql` are recognized
    /// by the configuration schema but rejected here.
    pub async fn from_config(
        config: &DatabaseConfig,
        retry_after: Duration,
    ) -> Result<Self, QueueError> {
        match config.adapter {
            DatabaseAdapter::Sqlite => Self::new(&config.name, retry_after).await,
            DatabaseAdapter::Mysql | DatabaseAdapter::Pgsql => Err(QueueError::Other(format!(
                "database adapter '{}' is not supported; use sqlite",
                config.adapter
            ))),
        }
    }

    /// Apply the schema.
    async fn run_migrations(&self) -> Result<(), QueueError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| QueueError::Database(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Return expired reservations in `queue` to the pending state.
    async fn sweep_expired(&self, queue: &str, now: i64) -> Result<(), QueueError> {
        let horizon = now - self.retry_after.as_secs() as i64;
        sqlx::query(
            "UPDATE jobs SET reserved_at = NULL, available_at = ? \
             WHERE queue = ? AND reserved_at IS NOT NULL AND reserved_at <= ?",
        )
        .bind(now)
        .bind(queue)
        .bind(horizon)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

type JobRow = (String, String, i64, Option<i64>, i64, i64);

fn row_to_record(row: JobRow, queue: &str) -> Result<JobRecord, QueueError> {
    let (id, payload, attempts, reserved_at, available_at, created_at) = row;
    let id = JobId::parse(&id).map_err(|e| QueueError::Serialization(e.to_string()))?;
    let payload = JobPayload::decode(&payload)?;
    Ok(JobRecord::rehydrate(
        id,
        queue,
        payload,
        attempts as u32,
        reserved_at,
        available_at,
        created_at,
    ))
}

#[async_trait]
impl QueueBackend for DatabaseQueue {
    async fn push(
        &self,
        payload: &JobPayload,
        queue: &str,
        delay: Duration,
    ) -> Result<JobId, QueueError> {
        let record = JobRecord::fresh(payload.clone(), queue, delay);

        sqlx::query(
            "INSERT INTO jobs (id, queue, payload, attempts, reserved_at, available_at, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(&record.queue)
        .bind(record.payload.encode()?)
        .bind(record.attempts as i64)
        .bind(record.reserved_at)
        .bind(record.available_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(record.id)
    }

    async fn pop(&self, queue: &str) -> Result<Option<JobRecord>, QueueError> {
        let now = now_unix();
        self.sweep_expired(queue, now).await?;

        loop {
            let row: Option<JobRow> = sqlx::query_as(
                "SELECT id, payload, attempts, reserved_at, available_at, created_at \
                 FROM jobs \
                 WHERE queue = ? AND reserved_at IS NULL AND available_at <= ? \
                 ORDER BY available_at ASC, created_at ASC, rowid ASC \
                 LIMIT 1",
            )
            .bind(queue)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = row else {
                return Ok(None);
            };
            let candidate_id = row.0.clone();

            let claimed = sqlx::query(
                "UPDATE jobs SET reserved_at = ?, attempts = attempts + 1 \
                 WHERE id = ? AND reserved_at IS NULL",
            )
            .bind(now)
            .bind(&candidate_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if claimed == 0 {
                // Another worker won the race; retry with the next candidate.
                continue;
            }

            let mut record = row_to_record(row, queue)?;
            record.mark_reserved(now);
            return Ok(Some(record));
        }
    }

    async fn release(&self, record: &JobRecord, delay: Duration) -> Result<(), QueueError> {
        let now = now_unix();
        sqlx::query("UPDATE jobs SET reserved_at = NULL, available_at = ? WHERE id = ?")
            .bind(now + delay.as_secs() as i64)
            .bind(record.id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, record: &JobRecord) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(record.id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, record: &JobRecord, exception: &str) -> Result<(), QueueError> {
        let failed = FailedJob::from_record(record, exception, now_unix());
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO failed_jobs (id, queue, payload, exception, failed_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(failed.id.to_string())
        .bind(&failed.queue)
        .bind(failed.payload.encode()?)
        .bind(&failed.exception)
        .bind(failed.failed_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(record.id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn size(&self, queue: &str) -> Result<u64, QueueError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE queue = ? AND reserved_at IS NULL")
                .bind(queue)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    async fn clear(&self, queue: &str) -> Result<u64, QueueError> {
        let result = sqlx::query("DELETE FROM jobs WHERE queue = ?")
            .bind(queue)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn failed_jobs(&self) -> Result<Vec<FailedJob>, QueueError> {
        let rows: Vec<(String, String, String, String, i64)> = sqlx::query_as(
            "SELECT id, queue, payload, exception, failed_at \
             FROM failed_jobs ORDER BY failed_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, queue, payload, exception, failed_at)| {
                Ok(FailedJob {
                    id: JobId::parse(&id).map_err(|e| QueueError::Serialization(e.to_string()))?,
                    queue,
                    payload: JobPayload::decode(&payload)?,
                    exception,
                    failed_at,
                })
            })
            .collect()
    }

    async fn retry_failed_job(&self, id: &JobId) -> Result<bool, QueueError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(String, String)> =
            sqlx::query_as("SELECT queue, payload FROM failed_jobs WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&mut *tx)
                .await?;

        let Some((queue, payload)) = row else {
            return Ok(false);
        };

        let record = JobRecord::fresh(JobPayload::decode(&payload)?, queue, Duration::ZERO);
        sqlx::query(
            "INSERT INTO jobs (id, queue, payload, attempts, reserved_at, available_at, created_at) \
             VALUES (?, ?, ?, 0, NULL, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(&record.queue)
        .bind(record.payload.encode()?)
        .bind(record.available_at)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM failed_jobs WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn forget_failed_job(&self, id: &JobId) -> Result<bool, QueueError> {
        let result = sqlx::query("DELETE FROM failed_jobs WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_failed_jobs(&self) -> Result<u64, QueueError> {
        let result = sqlx::query("DELETE FROM failed_jobs").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
