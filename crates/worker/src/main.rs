use std::sync::Arc;
use std::time::Duration;

use syncflow::api;
use syncflow::config::Config;
use syncflow::db;
use syncflow::jobs::retry::RetryConfig;
use syncflow::jobs::{
    JobRunner, JobsRepo, Maintenance, SavedTracksStep, StepRegistry, SAVED_TRACKS_JOB,
};
use syncflow::logging::{self, LogConfig};
use syncflow::queue::PgWorkQueue;
use syncflow::service::SyncService;
use syncflow::sink::ParquetSink;
use syncflow::source::{HttpPageSource, Paced};
use tokio::task::JoinSet;
use tracing::{error, info};

const IDLE_POLL: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env()?;
    logging::init(&LogConfig::from_env()?)?;

    info!(
        worker_id = %cfg.worker_id,
        queue = %cfg.queue,
        visibility_secs = cfg.visibility_seconds,
        max_receives = cfg.max_receives,
        consumers = cfg.consumers,
        page_size = cfg.page_size,
        dataset_root = %cfg.dataset_root.display(),
        api = cfg.api_addr.as_deref().unwrap_or("disabled"),
        migrate_on_startup = cfg.migrate_on_startup,
        "syncflow starting"
    );

    let pool = db::make_pool(&cfg).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
    }

    let tracker = Arc::new(JobsRepo::new(pool.clone()));
    let queue = Arc::new(PgWorkQueue::new(
        pool.clone(),
        cfg.queue.clone(),
        cfg.max_receives,
    ));

    let source = Paced::new(
        HttpPageSource::new(
            cfg.source_base_url.clone(),
            Duration::from_secs(cfg.source_timeout_secs),
        )?,
        cfg.page_pacing(),
    );
    let sink = ParquetSink::new(cfg.dataset_root.clone());

    let mut registry = StepRegistry::new();
    registry.register_with_timeout(
        SAVED_TRACKS_JOB,
        Arc::new(SavedTracksStep::new(
            Arc::new(source),
            Arc::new(sink),
            cfg.page_size,
        )),
        step_timeout(cfg.visibility()),
    );
    let registry = Arc::new(registry);

    let runner = JobRunner::new(
        tracker.clone(),
        queue.clone(),
        registry.clone(),
        RetryConfig::default(),
        cfg.visibility(),
    );

    // ---- API task ----
    let app = api::router(api::ApiState {
        service: SyncService::new(tracker.clone(), queue.clone(), registry.clone()),
    });
    let api_addr = cfg.api_addr.clone();
    let api_handle = tokio::spawn(async move {
        if let Some(addr) = api_addr {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("api listening on http://{addr}");
            axum::serve(listener, app).await?;
        } else {
            std::future::pending::<()>().await;
        }
        Ok::<(), anyhow::Error>(())
    });

    // ---- Maintenance task ----
    let maintenance = Maintenance::new(
        tracker.clone(),
        queue.clone(),
        Duration::from_secs(cfg.dedup_window_secs.max(0) as u64),
    );
    let maintenance_handle = tokio::spawn(
        maintenance.run_forever(Duration::from_secs(cfg.maintenance_interval_secs.max(1))),
    );

    // ---- Consumer tasks ----
    let mut consumers = JoinSet::new();
    for n in 0..cfg.consumers {
        let runner = runner.clone();
        let consumer_id = format!("{}-{n}", cfg.worker_id);
        consumers.spawn(async move {
            loop {
                match runner.poll_once().await {
                    Ok(Some(processed)) => {
                        tracing::debug!(consumer = %consumer_id, ?processed, "unit settled");
                    }
                    Ok(None) => tokio::time::sleep(IDLE_POLL).await,
                    Err(e) => {
                        // Already recorded against the job by the runner.
                        error!(consumer = %consumer_id, code = e.code(), error = %e, "step failed");
                        tokio::time::sleep(IDLE_POLL).await;
                    }
                }
            }
        });
    }

    tokio::select! {
        res = api_handle => res??,
        res = maintenance_handle => res?,
        Some(res) = consumers.join_next() => res?,
    }

    Ok(())
}

/// Steps must finish before their lease runs out, or a redelivery could
/// overlap the running attempt.
fn step_timeout(visibility: Duration) -> Duration {
    visibility
        .saturating_sub(Duration::from_secs(2))
        .max(Duration::from_secs(1))
}
