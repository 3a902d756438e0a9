//! Postgres-backed job store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | JobStoreError |
//! |------------|----------------------|---------------|
//! | Database (unique violation on the idempotency index) | `23505` | `DuplicateIdempotencyKey` |
//! | Database (unique violation on the primary key) | `23505` | `AlreadyExists` |
//! | Anything else | Any | `Storage` |
//!
//! Idempotency-key uniqueness is enforced by a partial unique index, so two
//! concurrent submissions with the same key cannot both insert a record.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::instrument;

use tasksvc_core::{Document, JobId};
use tasksvc_jobs::{Job, JobStatus};

use super::store::{JobStore, JobStoreError};

const IDEMPOTENCY_INDEX: &str = "jobs_idempotency_key_uq";

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id UUID PRIMARY KEY,
        job_type VARCHAR(64) NOT NULL,
        payload JSONB NOT NULL DEFAULT '{}'::jsonb,
        idempotency_key VARCHAR(128),
        status VARCHAR(32) NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        started_at TIMESTAMPTZ,
        completed_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL,
        last_error TEXT,
        compensation_error TEXT,
        result JSONB
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS jobs_idempotency_key_uq
        ON jobs (idempotency_key)
        WHERE idempotency_key IS NOT NULL
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS jobs_created_at_idx ON jobs (created_at DESC)
    "#,
];

const COLUMNS: &str = "id, job_type, payload, idempotency_key, status, attempts, \
     started_at, completed_at, created_at, last_error, compensation_error, result";

/// Job store persisted in a single `jobs` table.
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

    /// Connect with a default pool.
    pub async fn connect(database_url: &str) -> Result<Self, JobStoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the table and indexes if they don't exist.
    pub async fn migrate(&self) -> Result<(), JobStoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(self.pool.as_ref())
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn create(&self, job: &Job) -> Result<(), JobStoreError> {
        let sql = format!(
            "INSERT INTO jobs ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        );
        let attempts = attempts_to_db(job.attempts)?;
        sqlx::query(&sql)
            .bind(job.id.as_uuid())
            .bind(&job.job_type)
            .bind(Json(&job.payload))
            .bind(&job.idempotency_key)
            .bind(job.status.as_str())
            .bind(attempts)
            .bind(job.started_at)
            .bind(job.completed_at)
            .bind(job.created_at)
            .bind(&job.last_error)
            .bind(&job.compensation_error)
            .bind(job.result.as_ref().map(Json))
            .execute(self.pool.as_ref())
            .await
            .map_err(|e| match map_sqlx_error("create", e) {
                JobStoreError::DuplicateIdempotencyKey(_) => JobStoreError::DuplicateIdempotencyKey(
                    job.idempotency_key.clone().unwrap_or_default(),
                ),
                JobStoreError::AlreadyExists(_) => JobStoreError::AlreadyExists(job.id),
                other => other,
            })?;
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let sql = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(|e| map_sqlx_error("get", e))?;
        row.map(|r| row_to_job(&r)).transpose()
    }

    async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<Job>, JobStoreError> {
        let sql = format!("SELECT {COLUMNS} FROM jobs WHERE idempotency_key = $1");
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(|e| map_sqlx_error("get_by_idempotency_key", e))?;
        row.map(|r| row_to_job(&r)).transpose()
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, status = %job.status))]
    async fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        let attempts = attempts_to_db(job.attempts)?;
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                attempts = $3,
                started_at = $4,
                completed_at = $5,
                last_error = $6,
                compensation_error = $7,
                result = $8
            WHERE id = $1
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.status.as_str())
        .bind(attempts)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.last_error)
        .bind(&job.compensation_error)
        .bind(job.result.as_ref().map(Json))
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound(job.id));
        }
        Ok(())
    }

    async fn list_recent(&self, limit: Option<usize>) -> Result<Vec<Job>, JobStoreError> {
        let limit = limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(i64::MAX);
        let sql = format!("SELECT {COLUMNS} FROM jobs ORDER BY created_at DESC, id DESC LIMIT $1");
        let rows = sqlx::query(&sql)
            .bind(limit)
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(|e| map_sqlx_error("list_recent", e))?;
        rows.iter().map(row_to_job).collect()
    }
}

fn attempts_to_db(attempts: u32) -> Result<i32, JobStoreError> {
    i32::try_from(attempts)
        .map_err(|_| JobStoreError::Storage(format!("attempts out of range: {attempts}")))
}

fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<Job, JobStoreError> {
    decode_row(row).map_err(|e| JobStoreError::Storage(format!("failed to decode job row: {e}")))
}

fn decode_row(row: &sqlx::postgres::PgRow) -> Result<Job, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status: JobStatus = status
        .parse()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    let attempts: i32 = row.try_get("attempts")?;
    let payload: Json<Document> = row.try_get("payload")?;
    let result: Option<Json<Document>> = row.try_get("result")?;
    let id: uuid::Uuid = row.try_get("id")?;
    let started_at: Option<DateTime<Utc>> = row.try_get("started_at")?;
    let completed_at: Option<DateTime<Utc>> = row.try_get("completed_at")?;

    Ok(Job {
        id: JobId::from_uuid(id),
        job_type: row.try_get("job_type")?,
        payload: payload.0,
        idempotency_key: row.try_get("idempotency_key")?,
        status,
        attempts: u32::try_from(attempts).unwrap_or(0),
        started_at,
        completed_at,
        created_at: row.try_get("created_at")?,
        last_error: row.try_get("last_error")?,
        compensation_error: row.try_get("compensation_error")?,
        result: result.map(|r| r.0),
    })
}

/// Map SQLx errors to JobStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            if db_err.code().as_deref() == Some("23505") {
                if db_err.constraint() == Some(IDEMPOTENCY_INDEX) {
                    return JobStoreError::DuplicateIdempotencyKey(msg);
                }
                return JobStoreError::AlreadyExists(JobId::from_uuid(uuid::Uuid::nil()));
            }
            JobStoreError::Storage(msg)
        }
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => JobStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
