use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::Result;
use crate::jobs::model::JobRecord;

/// Passive ledger of job records keyed by `(job_type, job_id)`.
///
/// The tracker never schedules work. Transitions only move PENDING records;
/// `complete` and `fail` report whether a transition actually happened, and
/// callers are expected to have checked the record first.
#[async_trait]
pub trait JobTracker: Send + Sync {
    /// Inserts a PENDING record with a fresh random id and returns the id.
    /// Store failures surface as `StoreUnavailable` and are not retried here.
    async fn create(&self, job_type: &str, parameters: Value, now: DateTime<Utc>)
        -> Result<String>;

    /// `None` when the record is unknown or `expires_at <= now`.
    async fn get(
        &self,
        job_type: &str,
        job_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<JobRecord>>;

    async fn complete(&self, job_type: &str, job_id: &str, now: DateTime<Utc>) -> Result<bool>;

    async fn fail(
        &self,
        job_type: &str,
        job_id: &str,
        diagnostic: &str,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Attaches a retryable failure to a PENDING record without changing its status.
    async fn record_error(
        &self,
        job_type: &str,
        job_id: &str,
        diagnostic: &str,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Evicts up to `batch` records whose `expires_at <= now`. Returns the number removed.
    async fn purge_expired(&self, now: DateTime<Utc>, batch: i64) -> Result<u64>;
}
