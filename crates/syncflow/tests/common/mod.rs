#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::{postgres::PgPoolOptions, PgPool};

use syncflow::error::{Result, SyncError};
use syncflow::jobs::retry::RetryConfig;
use syncflow::jobs::{
    JobRunner, MemoryJobTracker, Processed, SavedTracksStep, StepRegistry, SAVED_TRACKS_JOB,
};
use syncflow::queue::{Credential, MemoryWorkQueue};
use syncflow::service::SyncService;
use syncflow::sink::ParquetSink;
use syncflow::source::{PageSource, RawPage};

/// `None` (and the test returns early) when no database is configured.
pub async fn setup_db() -> Option<PgPool> {
    let _ = dotenvy::dotenv();

    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set; skipping postgres test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations failed");

    sqlx::query("TRUNCATE TABLE work_units, sync_jobs")
        .execute(&pool)
        .await
        .expect("truncate failed");

    Some(pool)
}

pub fn saved_track(n: u32) -> Value {
    json!({
        "added_at": "2024-05-01T10:00:00Z",
        "track": {
            "id": format!("trk{n}"),
            "name": format!("Song {n}"),
            "type": "track",
            "duration_ms": 200_000 + n,
            "track_number": 1,
            "available_markets": ["US"],
            "popularity": 50,
            "album": {
                "id": "alb1",
                "name": "Album",
                "type": "album",
                "release_date": "2021-03-04"
            }
        }
    })
}

#[derive(Debug, Clone)]
pub enum Fault {
    Malformed,
    Unauthorized,
    RateLimited(Option<Duration>),
    Transport,
}

/// A library of `total` saved tracks, with faults scripted per cursor.
pub struct ScriptedSource {
    total: u32,
    faults: Mutex<HashMap<u32, VecDeque<Fault>>>,
    calls: Mutex<Vec<u32>>,
}

impl ScriptedSource {
    pub fn new(total: u32) -> Self {
        Self {
            total,
            faults: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// The next fetch at `cursor` fails with `fault`. Faults queue up in order.
    pub fn fail_at(&self, cursor: u32, fault: Fault) {
        self.faults
            .lock()
            .unwrap()
            .entry(cursor)
            .or_default()
            .push_back(fault);
    }

    pub fn calls(&self) -> Vec<u32> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageSource for ScriptedSource {
    async fn fetch(&self, _credential: &Credential, cursor: u32, page_size: u32) -> Result<RawPage> {
        self.calls.lock().unwrap().push(cursor);

        let fault = self
            .faults
            .lock()
            .unwrap()
            .get_mut(&cursor)
            .and_then(VecDeque::pop_front);

        match fault {
            Some(Fault::Malformed) => {
                return Ok(RawPage {
                    items: vec![json!({"track": {"id": "broken"}})],
                    has_more: true,
                })
            }
            Some(Fault::Unauthorized) => {
                return Err(SyncError::Unauthorized("token expired".into()))
            }
            Some(Fault::RateLimited(retry_after)) => {
                return Err(SyncError::RateLimited { retry_after })
            }
            Some(Fault::Transport) => return Err(SyncError::Transport("connection reset".into())),
            None => {}
        }

        let end = (cursor + page_size).min(self.total);
        Ok(RawPage {
            items: (cursor..end).map(saved_track).collect(),
            has_more: end < self.total,
        })
    }
}

pub const PAGE_SIZE: u32 = 50;

/// Everything wired in memory, with the dataset in a temp dir.
pub struct Harness {
    pub tracker: Arc<MemoryJobTracker>,
    pub queue: Arc<MemoryWorkQueue>,
    pub source: Arc<ScriptedSource>,
    pub sink: ParquetSink,
    pub service: SyncService,
    pub runner: JobRunner,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(total: u32, max_receives: i32) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let tracker = Arc::new(MemoryJobTracker::new());
        let queue = Arc::new(MemoryWorkQueue::new(max_receives));
        let source = Arc::new(ScriptedSource::new(total));
        let sink = ParquetSink::new(dir.path().join("user_saved_tracks"));

        let mut registry = StepRegistry::new();
        registry.register(
            SAVED_TRACKS_JOB,
            Arc::new(SavedTracksStep::new(
                source.clone(),
                Arc::new(sink.clone()),
                PAGE_SIZE,
            )),
        );
        let registry = Arc::new(registry);

        let service = SyncService::new(tracker.clone(), queue.clone(), registry.clone());
        let runner = JobRunner::new(
            tracker.clone(),
            queue.clone(),
            registry,
            RetryConfig::default(),
            Duration::from_secs(30),
        );

        Self {
            tracker,
            queue,
            source,
            sink,
            service,
            runner,
            _dir: dir,
        }
    }

    pub async fn submit(&self, user_id: &str) -> String {
        self.service
            .submit(
                SAVED_TRACKS_JOB,
                json!({ "user_id": user_id }),
                Credential::new("access-token"),
                chrono::Utc::now(),
            )
            .await
            .expect("submit")
            .job_id
    }

    /// Polls until the queue has nothing visible, collecting every result.
    pub async fn drain(&self) -> Vec<Result<Processed>> {
        let mut out = Vec::new();
        loop {
            match self.runner.poll_once().await {
                Ok(None) => return out,
                Ok(Some(p)) => out.push(Ok(p)),
                Err(e) => out.push(Err(e)),
            }
        }
    }
}
