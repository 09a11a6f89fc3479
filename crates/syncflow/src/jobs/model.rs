use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JOB_ID_LEN: usize = 8;
const JOB_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Records become eligible for eviction this long after creation, whatever their status.
pub fn job_ttl() -> Duration {
    Duration::days(7)
}

/// Random 8-char id; uniqueness per job type is probabilistic, no oracle is consulted.
pub fn generate_job_id(rng: &mut impl Rng) -> String {
    (0..JOB_ID_LEN)
        .map(|_| JOB_ID_ALPHABET[rng.gen_range(0..JOB_ID_ALPHABET.len())] as char)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(JobStatus::Pending),
            "SUCCEEDED" => Some(JobStatus::Succeeded),
            "FAILED" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub job_type: String,
    pub job_id: String,
    pub parameters: Value,
    pub status: JobStatus,
    pub status_message: Option<String>,
    /// Latest retryable failure; the job stays PENDING while redelivery can still succeed.
    pub last_error: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub last_status_update_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new_pending(
        job_type: &str,
        job_id: String,
        parameters: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_type: job_type.to_string(),
            job_id,
            parameters,
            status: JobStatus::Pending,
            status_message: None,
            last_error: None,
            requested_at: now,
            last_status_update_at: now,
            expires_at: now + job_ttl(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct JobRow {
    pub job_type: String,
    pub job_id: String,
    pub parameters: Value,
    pub status: String,
    pub status_message: Option<String>,
    pub last_error: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub last_status_update_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = crate::error::SyncError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::parse(&row.status).ok_or_else(|| {
            crate::error::SyncError::StoreUnavailable(format!(
                "job {}/{} has unknown status {}",
                row.job_type, row.job_id, row.status
            ))
        })?;
        Ok(Self {
            job_type: row.job_type,
            job_id: row.job_id,
            parameters: row.parameters,
            status,
            status_message: row.status_message,
            last_error: row.last_error,
            requested_at: row.requested_at,
            last_status_update_at: row.last_status_update_at,
            expires_at: row.expires_at,
        })
    }
}
