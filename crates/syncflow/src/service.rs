//! Submission and status lookup, the two operations exposed to callers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use crate::error::{Result, SyncError};
use crate::jobs::model::{JobRecord, JobStatus};
use crate::jobs::step::StepRegistry;
use crate::jobs::tracker::JobTracker;
use crate::queue::{Credential, WorkQueue, WorkUnit};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub job_id: String,
    pub status: JobStatus,
}

/// What a caller may see about a job. Parameters and internal error
/// history stay private.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobView {
    pub job_id: String,
    pub status: JobStatus,
    pub status_message: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub last_status_update_at: DateTime<Utc>,
}

impl From<JobRecord> for JobView {
    fn from(r: JobRecord) -> Self {
        Self {
            job_id: r.job_id,
            status: r.status,
            status_message: r.status_message,
            requested_at: r.requested_at,
            last_status_update_at: r.last_status_update_at,
        }
    }
}

#[derive(Clone)]
pub struct SyncService {
    tracker: Arc<dyn JobTracker>,
    queue: Arc<dyn WorkQueue>,
    registry: Arc<StepRegistry>,
}

impl SyncService {
    pub fn new(
        tracker: Arc<dyn JobTracker>,
        queue: Arc<dyn WorkQueue>,
        registry: Arc<StepRegistry>,
    ) -> Self {
        Self {
            tracker,
            queue,
            registry,
        }
    }

    /// Creates a PENDING job and enqueues its first unit at cursor 0.
    ///
    /// If the first enqueue fails the job is marked FAILED before the error
    /// is returned, so no PENDING job is left without a chain.
    pub async fn submit(
        &self,
        job_type: &str,
        parameters: Value,
        credential: Credential,
        now: DateTime<Utc>,
    ) -> Result<Submission> {
        let step = self
            .registry
            .step_for(job_type)
            .ok_or_else(|| SyncError::BadRequest(format!("unknown job type `{job_type}`")))?;
        step.step.validate(&parameters)?;
        if credential.expose().trim().is_empty() {
            return Err(SyncError::BadRequest("access token is required".into()));
        }

        let job_id = self.tracker.create(job_type, parameters, now).await?;
        let first = WorkUnit::first(job_type, &job_id, credential, now);

        if let Err(e) = self.queue.enqueue(&first).await {
            error!(job_type, job_id = %job_id, error = %e, "first unit could not be enqueued");
            if let Err(fail_err) = self
                .tracker
                .fail(job_type, &job_id, &e.diagnostic(), Utc::now())
                .await
            {
                error!(job_id = %job_id, error = %fail_err, "could not fail orphaned job");
            }
            return Err(e);
        }

        info!(job_type, job_id = %job_id, "job submitted");
        Ok(Submission {
            job_id,
            status: JobStatus::Pending,
        })
    }

    /// `None` for unknown and expired jobs alike.
    pub async fn status(
        &self,
        job_type: &str,
        job_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<JobView>> {
        Ok(self
            .tracker
            .get(job_type, job_id, now)
            .await?
            .map(JobView::from))
    }
}
