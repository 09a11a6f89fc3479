use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::jobs::model::{generate_job_id, JobRecord, JobStatus};
use crate::jobs::tracker::JobTracker;

type Key = (String, String);

/// Process-local tracker for tests and single-node runs.
#[derive(Default)]
pub struct MemoryJobTracker {
    records: RwLock<HashMap<Key, JobRecord>>,
}

impl MemoryJobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw record, including expired ones that have not been purged yet.
    pub async fn snapshot(&self, job_type: &str, job_id: &str) -> Option<JobRecord> {
        self.records
            .read()
            .await
            .get(&(job_type.to_string(), job_id.to_string()))
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    async fn transition(
        &self,
        job_type: &str,
        job_id: &str,
        to: JobStatus,
        status_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        let mut records = self.records.write().await;
        match records.get_mut(&(job_type.to_string(), job_id.to_string())) {
            Some(rec) if rec.status == JobStatus::Pending => {
                rec.status = to;
                rec.status_message = status_message.map(str::to_string);
                rec.last_status_update_at = rec.last_status_update_at.max(now);
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl JobTracker for MemoryJobTracker {
    async fn create(
        &self,
        job_type: &str,
        parameters: Value,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let job_id = generate_job_id(&mut rand::thread_rng());
        let rec = JobRecord::new_pending(job_type, job_id.clone(), parameters, now);
        self.records
            .write()
            .await
            .insert((job_type.to_string(), job_id.clone()), rec);
        Ok(job_id)
    }

    async fn get(
        &self,
        job_type: &str,
        job_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<JobRecord>> {
        Ok(self
            .snapshot(job_type, job_id)
            .await
            .filter(|rec| !rec.is_expired(now)))
    }

    async fn complete(&self, job_type: &str, job_id: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .transition(job_type, job_id, JobStatus::Succeeded, None, now)
            .await)
    }

    async fn fail(
        &self,
        job_type: &str,
        job_id: &str,
        diagnostic: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self
            .transition(job_type, job_id, JobStatus::Failed, Some(diagnostic), now)
            .await)
    }

    async fn record_error(
        &self,
        job_type: &str,
        job_id: &str,
        diagnostic: &str,
        _now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(&(job_type.to_string(), job_id.to_string())) {
            Some(rec) if rec.status == JobStatus::Pending => {
                rec.last_error = Some(diagnostic.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_expired(&self, now: DateTime<Utc>, batch: i64) -> Result<u64> {
        let mut records = self.records.write().await;
        let expired: Vec<Key> = records
            .iter()
            .filter(|(_, rec)| rec.is_expired(now))
            .map(|(k, _)| k.clone())
            .take(batch.max(1) as usize)
            .collect();
        for key in &expired {
            records.remove(key);
        }
        Ok(expired.len() as u64)
    }
}
