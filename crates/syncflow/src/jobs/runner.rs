use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::{rngs::StdRng, SeedableRng};
use tracing::{debug, error, info, warn};

use crate::error::{ErrorClass, Result, SyncError};
use crate::jobs::model::JobRecord;
use crate::jobs::retry::{redelivery_delay, RetryConfig};
use crate::jobs::step::{StepOutcome, StepRegistry};
use crate::jobs::tracker::JobTracker;
use crate::queue::{Delivery, WorkQueue};

/// How a delivered work unit was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processed {
    /// Page written, successor enqueued, current message deleted.
    Advanced { next_cursor: u32 },
    /// Last page written and the job marked SUCCEEDED.
    Completed,
    /// The chain was already over (job missing, expired or terminal); message dropped.
    Dropped,
}

#[derive(Clone)]
pub struct JobRunner {
    tracker: Arc<dyn JobTracker>,
    queue: Arc<dyn WorkQueue>,
    registry: Arc<StepRegistry>,
    retry_cfg: RetryConfig,
    visibility: Duration,
}

impl JobRunner {
    pub fn new(
        tracker: Arc<dyn JobTracker>,
        queue: Arc<dyn WorkQueue>,
        registry: Arc<StepRegistry>,
        retry_cfg: RetryConfig,
        visibility: Duration,
    ) -> Self {
        Self {
            tracker,
            queue,
            registry,
            retry_cfg,
            visibility,
        }
    }

    /// Receives one message and settles it. `Ok(None)` means the queue was empty.
    pub async fn poll_once(&self) -> Result<Option<Processed>> {
        match self.queue.receive(self.visibility).await? {
            Some(delivery) => self.process(delivery).await.map(Some),
            None => Ok(None),
        }
    }

    /// Runs one page step for a delivered unit.
    ///
    /// Ordering on success is write, enqueue-next, delete-current; on the last
    /// page it is complete, delete. A crash between any two of those leaves the
    /// current message to be redelivered, and the page write and the successor
    /// enqueue both converge on replay.
    ///
    /// A failing step is recorded on the job before the error is returned.
    pub async fn process(&self, delivery: Delivery) -> Result<Processed> {
        let unit = &delivery.unit;
        let job = match self
            .tracker
            .get(&unit.job_type, &unit.job_id, Utc::now())
            .await?
        {
            Some(job) if !job.status.is_terminal() => job,
            other => {
                info!(
                    job_type = %unit.job_type,
                    job_id = %unit.job_id,
                    cursor = unit.cursor,
                    status = other.as_ref().map(|j| j.status.as_str()).unwrap_or("NOT_FOUND"),
                    "chain already finished, dropping message"
                );
                self.queue.delete(&delivery.receipt).await?;
                return Ok(Processed::Dropped);
            }
        };

        let Some(step) = self.registry.step_for(&unit.job_type) else {
            let err = SyncError::BadRequest(format!("no step registered for `{}`", unit.job_type));
            return Err(self.handle_failure(&delivery, &job, err).await);
        };

        match step.run(&job, unit).await {
            Ok(StepOutcome::Continue { next }) => {
                let next_cursor = next.cursor;
                let settled = async {
                    let accepted = self.queue.enqueue(&next).await?;
                    if !accepted {
                        debug!(dedup_key = %next.dedup_key(), "successor already enqueued");
                    }
                    self.delete_current(&delivery).await
                }
                .await;
                match settled {
                    Ok(()) => Ok(Processed::Advanced { next_cursor }),
                    Err(e) => Err(self.handle_failure(&delivery, &job, e).await),
                }
            }
            Ok(StepOutcome::Done) => {
                let settled = async {
                    if self
                        .tracker
                        .complete(&unit.job_type, &unit.job_id, Utc::now())
                        .await?
                    {
                        info!(job_type = %unit.job_type, job_id = %unit.job_id, "job succeeded");
                    } else {
                        warn!(job_id = %unit.job_id, "job was already terminal at completion");
                    }
                    self.delete_current(&delivery).await
                }
                .await;
                match settled {
                    Ok(()) => Ok(Processed::Completed),
                    Err(e) => Err(self.handle_failure(&delivery, &job, e).await),
                }
            }
            Err(e) => Err(self.handle_failure(&delivery, &job, e).await),
        }
    }

    async fn delete_current(&self, delivery: &Delivery) -> Result<()> {
        if !self.queue.delete(&delivery.receipt).await? {
            warn!(
                message_id = %delivery.receipt.message_id,
                "lease lost before delete; message will be redelivered"
            );
        }
        Ok(())
    }

    /// Records `err` against the job and settles the message, returning `err`.
    ///
    /// - non-retryable: job FAILED, message deleted
    /// - retryable, receives left: job keeps PENDING with `last_error`, lease
    ///   pushed out by the backoff
    /// - retryable, last receive: job FAILED, message left for dead-lettering
    async fn handle_failure(&self, delivery: &Delivery, job: &JobRecord, err: SyncError) -> SyncError {
        let unit = &delivery.unit;
        let diagnostic = format!("{} (cursor {})", err.diagnostic(), unit.cursor);
        let class = err.class();
        // The queue's own limit, so the last receive here is the last one it hands out.
        let exhausted = delivery.receive_count >= self.queue.max_receives();

        let recorded = match (class, exhausted) {
            (ErrorClass::NonRetryable, _) => {
                error!(
                    job_id = %job.job_id,
                    cursor = unit.cursor,
                    code = err.code(),
                    "non-retryable failure; failing job"
                );
                self.fail_and_delete(delivery, job, &diagnostic).await
            }
            (ErrorClass::Retryable, true) => {
                error!(
                    job_id = %job.job_id,
                    cursor = unit.cursor,
                    receive_count = delivery.receive_count,
                    code = err.code(),
                    "receives exhausted; failing job"
                );
                let diagnostic =
                    format!("{diagnostic}; gave up after {} receives", delivery.receive_count);
                self.tracker
                    .fail(&job.job_type, &job.job_id, &diagnostic, Utc::now())
                    .await
                    .map(|_| ())
            }
            (ErrorClass::Retryable, false) => {
                let mut rng = StdRng::from_entropy();
                let delay =
                    redelivery_delay(&err, delivery.receive_count, &self.retry_cfg, &mut rng);
                warn!(
                    job_id = %job.job_id,
                    cursor = unit.cursor,
                    receive_count = delivery.receive_count,
                    delay_secs = delay.as_secs(),
                    code = err.code(),
                    "retryable failure; message will be redelivered"
                );
                self.record_and_back_off(delivery, job, &diagnostic, delay)
                    .await
            }
        };

        if let Err(e) = recorded {
            error!(job_id = %job.job_id, error = %e, "could not record step failure");
        }
        err
    }

    async fn fail_and_delete(&self, delivery: &Delivery, job: &JobRecord, diagnostic: &str) -> Result<()> {
        self.tracker
            .fail(&job.job_type, &job.job_id, diagnostic, Utc::now())
            .await?;
        self.queue.delete(&delivery.receipt).await?;
        Ok(())
    }

    async fn record_and_back_off(
        &self,
        delivery: &Delivery,
        job: &JobRecord,
        diagnostic: &str,
        delay: Duration,
    ) -> Result<()> {
        self.tracker
            .record_error(&job.job_type, &job.job_id, diagnostic, Utc::now())
            .await?;
        self.queue.extend_lease(&delivery.receipt, delay).await?;
        Ok(())
    }
}
