use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::timeout;
use tracing::info;

use crate::error::{Result, SyncError};
use crate::jobs::model::JobRecord;
use crate::queue::WorkUnit;
use crate::sink::{PartitionKey, PartitionedSink, WriteMode};
use crate::source::PageSource;

/// What one page step decided about the rest of the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Continue { next: WorkUnit },
    Done,
}

/// The per-job-type page-processing capability. The [`super::runner::JobRunner`]
/// wraps every step with the job status transitions.
#[async_trait]
pub trait Step: Send + Sync {
    /// Rejects submissions the step could never process.
    fn validate(&self, _parameters: &Value) -> Result<()> {
        Ok(())
    }

    async fn run(&self, job: &JobRecord, unit: &WorkUnit) -> Result<StepOutcome>;
}

#[derive(Clone)]
pub struct StepEntry {
    pub step: Arc<dyn Step>,
    pub timeout: Option<Duration>,
}

impl StepEntry {
    pub async fn run(&self, job: &JobRecord, unit: &WorkUnit) -> Result<StepOutcome> {
        let fut = self.step.run(job, unit);
        match self.timeout {
            Some(dur) => timeout(dur, fut).await.unwrap_or_else(|_| {
                Err(SyncError::Transport(format!(
                    "step timed out after {}ms",
                    dur.as_millis()
                )))
            }),
            None => fut.await,
        }
    }
}

#[derive(Clone, Default)]
pub struct StepRegistry {
    steps: HashMap<String, StepEntry>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job_type: &str, step: Arc<dyn Step>) {
        self.steps.insert(
            job_type.to_string(),
            StepEntry {
                step,
                timeout: None,
            },
        );
    }

    /// Keep the timeout below the queue visibility so a stuck step cannot
    /// overlap its own redelivery.
    pub fn register_with_timeout(&mut self, job_type: &str, step: Arc<dyn Step>, dur: Duration) {
        self.steps.insert(
            job_type.to_string(),
            StepEntry {
                step,
                timeout: Some(dur),
            },
        );
    }

    pub fn step_for(&self, job_type: &str) -> Option<StepEntry> {
        self.steps.get(job_type).cloned()
    }
}

pub const SAVED_TRACKS_JOB: &str = "user_saved_tracks";

/// Walks a user's saved tracks one page per work unit.
///
/// Each page lands in its own partition
/// `user_id=<u>/requested_at=<submitted_at>/offset=<cursor>` and is written
/// with REPLACE_PARTITION, so a redelivered page overwrites itself.
pub struct SavedTracksStep {
    source: Arc<dyn PageSource>,
    sink: Arc<dyn PartitionedSink>,
    page_size: u32,
}

impl SavedTracksStep {
    pub fn new(source: Arc<dyn PageSource>, sink: Arc<dyn PartitionedSink>, page_size: u32) -> Self {
        Self {
            source,
            sink,
            page_size: page_size.max(1),
        }
    }

    pub fn page_partition(unit: &WorkUnit) -> Vec<PartitionKey> {
        vec![
            PartitionKey::new("requested_at", unit.submitted_at.to_rfc3339()),
            PartitionKey::new("offset", unit.cursor.to_string()),
        ]
    }
}

pub fn user_id(parameters: &Value) -> Result<&str> {
    parameters
        .get("user_id")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| SyncError::BadRequest("parameters.user_id is required".into()))
}

#[async_trait]
impl Step for SavedTracksStep {
    fn validate(&self, parameters: &Value) -> Result<()> {
        user_id(parameters).map(|_| ())
    }

    async fn run(&self, job: &JobRecord, unit: &WorkUnit) -> Result<StepOutcome> {
        let user = user_id(&job.parameters)?;
        info!(
            job_id = %unit.job_id,
            user_id = user,
            page = unit.cursor / self.page_size,
            "getting page of saved tracks"
        );

        let page = self
            .source
            .fetch_page(&unit.credential, unit.cursor, self.page_size)
            .await?;

        let receipt = self
            .sink
            .write(
                &PartitionKey::new("user_id", user),
                &Self::page_partition(unit),
                &page.records,
                WriteMode::ReplacePartition,
            )
            .await?;

        info!(
            job_id = %unit.job_id,
            user_id = user,
            cursor = unit.cursor,
            rows = receipt.rows,
            has_more = page.has_more,
            "saved page of saved tracks"
        );

        if page.has_more {
            Ok(StepOutcome::Continue {
                next: unit.next(self.page_size),
            })
        } else {
            Ok(StepOutcome::Done)
        }
    }
}
