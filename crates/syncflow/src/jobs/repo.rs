// crates/syncflow/src/jobs/repo.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;

use crate::error::Result;
use crate::jobs::model::{generate_job_id, JobRecord, JobRow, JobStatus};
use crate::jobs::tracker::JobTracker;

/// Postgres-backed job ledger (`sync_jobs`).
#[derive(Clone)]
pub struct JobsRepo {
    pool: PgPool,
}

impl JobsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ----------------------------
    // State transitions
    // ----------------------------

    // Shared by complete/fail. Only PENDING rows move, and the update timestamp
    // never goes backwards even if this worker's clock trails the previous writer.
    async fn transition(
        &self,
        job_type: &str,
        job_id: &str,
        to: JobStatus,
        status_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = $3,
                status_message = $4,
                last_status_update_at = GREATEST(last_status_update_at, $5)
            WHERE job_type = $1
              AND job_id = $2
              AND status = 'PENDING'
            "#,
        )
        .bind(job_type)
        .bind(job_id)
        .bind(to.as_str())
        .bind(status_message)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }
}

#[async_trait]
impl JobTracker for JobsRepo {
    async fn create(
        &self,
        job_type: &str,
        parameters: Value,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let job_id = generate_job_id(&mut rand::thread_rng());
        let rec = JobRecord::new_pending(job_type, job_id, parameters, now);

        sqlx::query(
            r#"
            INSERT INTO sync_jobs (
                job_type, job_id, parameters, status,
                requested_at, last_status_update_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&rec.job_type)
        .bind(&rec.job_id)
        .bind(&rec.parameters)
        .bind(rec.status.as_str())
        .bind(rec.requested_at)
        .bind(rec.last_status_update_at)
        .bind(rec.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(rec.job_id)
    }

    async fn get(
        &self,
        job_type: &str,
        job_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<JobRecord>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT job_type, job_id, parameters, status, status_message, last_error,
                   requested_at, last_status_update_at, expires_at
            FROM sync_jobs
            WHERE job_type = $1
              AND job_id = $2
              AND expires_at > $3
            "#,
        )
        .bind(job_type)
        .bind(job_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(JobRecord::try_from).transpose()
    }

    async fn complete(&self, job_type: &str, job_id: &str, now: DateTime<Utc>) -> Result<bool> {
        self.transition(job_type, job_id, JobStatus::Succeeded, None, now)
            .await
    }

    async fn fail(
        &self,
        job_type: &str,
        job_id: &str,
        diagnostic: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.transition(job_type, job_id, JobStatus::Failed, Some(diagnostic), now)
            .await
    }

    async fn record_error(
        &self,
        job_type: &str,
        job_id: &str,
        diagnostic: &str,
        _now: DateTime<Utc>,
    ) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET last_error = $3
            WHERE job_type = $1
              AND job_id = $2
              AND status = 'PENDING'
            "#,
        )
        .bind(job_type)
        .bind(job_id)
        .bind(diagnostic)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    async fn purge_expired(&self, now: DateTime<Utc>, batch: i64) -> Result<u64> {
        let res = sqlx::query(
            r#"
            DELETE FROM sync_jobs
            WHERE (job_type, job_id) IN (
                SELECT job_type, job_id
                FROM sync_jobs
                WHERE expires_at <= $1
                ORDER BY expires_at ASC
                LIMIT $2
            )
            "#,
        )
        .bind(now)
        .bind(batch.max(1))
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }
}
