use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::error::Result;
use crate::jobs::tracker::JobTracker;
use crate::queue::WorkQueue;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub purged_jobs: u64,
    pub dead_lettered: u64,
    pub failed_jobs: u64,
    pub purged_messages: u64,
}

/// Housekeeping that keeps the job store and the queue bounded.
#[derive(Clone)]
pub struct Maintenance {
    tracker: Arc<dyn JobTracker>,
    queue: Arc<dyn WorkQueue>,
    dedup_window: Duration,
    batch: i64,
}

impl Maintenance {
    pub fn new(tracker: Arc<dyn JobTracker>, queue: Arc<dyn WorkQueue>, dedup_window: Duration) -> Self {
        Self {
            tracker,
            queue,
            dedup_window,
            batch: 500,
        }
    }

    pub fn with_batch(mut self, batch: i64) -> Self {
        self.batch = batch.max(1);
        self
    }

    /// One pass: drop expired job records, move exhausted messages aside and
    /// fail their jobs, then forget delete tombstones older than the dedup window.
    ///
    /// A job whose last receive ended without a settled failure (a consumer
    /// crash, a lost lease) would otherwise stay PENDING until it expires.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<MaintenanceReport> {
        let purged_jobs = self.tracker.purge_expired(now, self.batch).await?;

        let parked = self.queue.dead_letter_exhausted().await?;
        let mut failed_jobs = 0;
        for p in &parked {
            let message = format!(
                "DEAD_LETTERED: dead-lettered after {} receives (cursor {})",
                p.receive_count, p.unit.cursor
            );
            // A job the runner already failed stays as it was.
            if self
                .tracker
                .fail(&p.unit.job_type, &p.unit.job_id, &message, now)
                .await?
            {
                warn!(
                    job_id = %p.unit.job_id,
                    job_type = %p.unit.job_type,
                    cursor = p.unit.cursor,
                    receive_count = p.receive_count,
                    "failed job whose unit was dead-lettered"
                );
                failed_jobs += 1;
            }
        }

        let purged_messages = self.queue.purge_deleted(self.dedup_window).await?;

        Ok(MaintenanceReport {
            purged_jobs,
            dead_lettered: parked.len() as u64,
            failed_jobs,
            purged_messages,
        })
    }

    pub async fn run_forever(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match self.run_once(Utc::now()).await {
                Ok(r) if r != MaintenanceReport::default() => info!(
                    purged_jobs = r.purged_jobs,
                    dead_lettered = r.dead_lettered,
                    failed_jobs = r.failed_jobs,
                    purged_messages = r.purged_messages,
                    "maintenance pass"
                ),
                Ok(_) => {}
                Err(e) => error!(error = %e, "maintenance pass failed"),
            }
        }
    }
}
