use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::queue::{Delivery, Parked, Receipt, WorkQueue, WorkUnit};

/// Postgres-backed work queue (`work_units`).
///
/// Leasing uses `FOR UPDATE SKIP LOCKED`, so concurrent consumers never
/// receive the same message while its lease is live. Deletion leaves a
/// tombstone so the dedup key outlives the message for the dedup window.
#[derive(Clone)]
pub struct PgWorkQueue {
    pool: PgPool,
    queue: String,
    max_receives: i32,
}

impl PgWorkQueue {
    pub fn new(pool: PgPool, queue: impl Into<String>, max_receives: i32) -> Self {
        Self {
            pool,
            queue: queue.into(),
            max_receives: max_receives.max(1),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }
}

fn millis(d: Duration) -> i64 {
    d.as_millis().min(i64::MAX as u128) as i64
}

#[async_trait]
impl WorkQueue for PgWorkQueue {
    fn max_receives(&self) -> i32 {
        self.max_receives
    }

    async fn enqueue(&self, unit: &WorkUnit) -> Result<bool> {
        let body = serde_json::to_value(unit)?;

        let res = sqlx::query(
            r#"
            INSERT INTO work_units (id, queue, dedup_key, body)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (queue, dedup_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&self.queue)
        .bind(unit.dedup_key())
        .bind(body)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    async fn receive(&self, visibility: Duration) -> Result<Option<Delivery>> {
        let lease_token = Uuid::new_v4();

        let row = sqlx::query_as::<_, (Uuid, Value, i32)>(
            r#"
            UPDATE work_units w
            SET visible_at = now() + ($2::bigint * interval '1 millisecond'),
                receive_count = w.receive_count + 1,
                lease_token = $3
            FROM (
                SELECT id
                FROM work_units
                WHERE queue = $1
                  AND deleted_at IS NULL
                  AND dead_lettered_at IS NULL
                  AND visible_at <= now()
                  AND receive_count < $4
                ORDER BY visible_at ASC, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            ) c
            WHERE w.id = c.id
            RETURNING w.id, w.body, w.receive_count
            "#,
        )
        .bind(&self.queue)
        .bind(millis(visibility))
        .bind(lease_token)
        .bind(self.max_receives)
        .fetch_optional(&self.pool)
        .await?;

        let Some((message_id, body, receive_count)) = row else {
            return Ok(None);
        };

        let unit: WorkUnit = serde_json::from_value(body).map_err(|e| {
            SyncError::MalformedRecord(format!("work unit {message_id} has invalid body: {e}"))
        })?;

        Ok(Some(Delivery {
            receipt: Receipt {
                message_id,
                lease_token,
            },
            unit,
            receive_count,
        }))
    }

    async fn delete(&self, receipt: &Receipt) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE work_units
            SET deleted_at = now(),
                lease_token = NULL
            WHERE id = $1
              AND lease_token = $2
              AND deleted_at IS NULL
            "#,
        )
        .bind(receipt.message_id)
        .bind(receipt.lease_token)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    async fn extend_lease(&self, receipt: &Receipt, delay: Duration) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE work_units
            SET visible_at = now() + ($3::bigint * interval '1 millisecond')
            WHERE id = $1
              AND lease_token = $2
              AND deleted_at IS NULL
            "#,
        )
        .bind(receipt.message_id)
        .bind(receipt.lease_token)
        .bind(millis(delay))
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    async fn dead_letter_exhausted(&self) -> Result<Vec<Parked>> {
        let rows = sqlx::query_as::<_, (Uuid, Value, i32)>(
            r#"
            UPDATE work_units
            SET dead_lettered_at = now(),
                lease_token = NULL
            WHERE queue = $1
              AND deleted_at IS NULL
              AND dead_lettered_at IS NULL
              AND receive_count >= $2
              AND visible_at <= now()
            RETURNING id, body, receive_count
            "#,
        )
        .bind(&self.queue)
        .bind(self.max_receives)
        .fetch_all(&self.pool)
        .await?;

        let mut parked = Vec::with_capacity(rows.len());
        for (message_id, body, receive_count) in rows {
            match serde_json::from_value::<WorkUnit>(body) {
                Ok(unit) => parked.push(Parked {
                    unit,
                    receive_count,
                }),
                // Still parked; there is just no job to report it against.
                Err(e) => warn!(%message_id, error = %e, "dead-lettered unit has invalid body"),
            }
        }
        Ok(parked)
    }

    async fn purge_deleted(&self, older_than: Duration) -> Result<u64> {
        let res = sqlx::query(
            r#"
            DELETE FROM work_units
            WHERE queue = $1
              AND deleted_at IS NOT NULL
              AND deleted_at < now() - ($2::bigint * interval '1 millisecond')
            "#,
        )
        .bind(&self.queue)
        .bind(millis(older_than))
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }
}
