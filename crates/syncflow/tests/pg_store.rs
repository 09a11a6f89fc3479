// tests/pg_store.rs
//
// Runs against TEST_DATABASE_URL; each test is a no-op when it is unset.
mod common;

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use common::setup_db;
use serde_json::json;
use serial_test::serial;
use syncflow::jobs::{JobStatus, JobTracker, JobsRepo};
use syncflow::queue::{Credential, PgWorkQueue, WorkQueue, WorkUnit};

fn unit(job_id: &str, cursor: u32) -> WorkUnit {
    WorkUnit {
        cursor,
        ..WorkUnit::first("user_saved_tracks", job_id, Credential::new("tok"), Utc::now())
    }
}

async fn expire_all(pool: &sqlx::PgPool) {
    sqlx::query("UPDATE work_units SET visible_at = now() - interval '1 second'")
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test]
#[serial]
async fn job_lifecycle_round_trips_through_postgres() {
    let Some(pool) = setup_db().await else { return };
    let repo = JobsRepo::new(pool.clone());
    let t0 = Utc::now();

    let job_id = repo
        .create("user_saved_tracks", json!({"user_id": "u1"}), t0)
        .await
        .unwrap();
    let rec = repo.get("user_saved_tracks", &job_id, t0).await.unwrap().unwrap();
    assert_eq!(rec.status, JobStatus::Pending);
    assert_eq!(rec.parameters, json!({"user_id": "u1"}));

    assert!(repo
        .record_error("user_saved_tracks", &job_id, "TRANSPORT: reset", t0)
        .await
        .unwrap());
    assert!(repo.complete("user_saved_tracks", &job_id, Utc::now()).await.unwrap());
    assert!(!repo
        .fail("user_saved_tracks", &job_id, "late failure", Utc::now())
        .await
        .unwrap());

    let rec = repo
        .get("user_saved_tracks", &job_id, Utc::now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rec.status, JobStatus::Succeeded);
    assert_eq!(rec.last_error.as_deref(), Some("TRANSPORT: reset"));
    assert!(rec.last_status_update_at >= rec.requested_at);

    // Other job types never see it.
    assert!(repo.get("other", &job_id, Utc::now()).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn expired_jobs_read_as_missing_and_are_purged() {
    let Some(pool) = setup_db().await else { return };
    let repo = JobsRepo::new(pool.clone());
    let old = Utc::now() - chrono::Duration::days(8);

    let job_id = repo.create("user_saved_tracks", json!({}), old).await.unwrap();
    assert!(repo
        .get("user_saved_tracks", &job_id, Utc::now())
        .await
        .unwrap()
        .is_none());
    assert_eq!(repo.purge_expired(Utc::now(), 100).await.unwrap(), 1);
}

#[tokio::test]
#[serial]
async fn two_consumers_never_hold_the_same_message() {
    let Some(pool) = setup_db().await else { return };
    let queue = PgWorkQueue::new(pool.clone(), "sync", 5);
    assert!(queue.enqueue(&unit("J1", 0)).await.unwrap());

    let (a, b) = tokio::join!(
        queue.receive(Duration::from_secs(30)),
        queue.receive(Duration::from_secs(30)),
    );
    let got: Vec<_> = [a.unwrap(), b.unwrap()].into_iter().flatten().collect();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].unit.cursor, 0);
    assert_eq!(got[0].receive_count, 1);
}

#[tokio::test]
#[serial]
async fn dedup_key_drops_second_enqueue_until_tombstone_is_purged() {
    let Some(pool) = setup_db().await else { return };
    let queue = PgWorkQueue::new(pool.clone(), "sync", 5);

    assert!(queue.enqueue(&unit("J2", 50)).await.unwrap());
    assert!(!queue.enqueue(&unit("J2", 50)).await.unwrap());

    let d = queue.receive(Duration::from_secs(30)).await.unwrap().unwrap();
    assert!(queue.delete(&d.receipt).await.unwrap());
    assert!(!queue.enqueue(&unit("J2", 50)).await.unwrap());

    assert_eq!(queue.purge_deleted(Duration::ZERO).await.unwrap(), 1);
    assert!(queue.enqueue(&unit("J2", 50)).await.unwrap());
}

#[tokio::test]
#[serial]
async fn stale_receipt_cannot_delete_redelivered_message() {
    let Some(pool) = setup_db().await else { return };
    let queue = PgWorkQueue::new(pool.clone(), "sync", 5);
    queue.enqueue(&unit("J3", 0)).await.unwrap();

    let first = queue.receive(Duration::from_secs(30)).await.unwrap().unwrap();
    expire_all(&pool).await;
    let second = queue.receive(Duration::from_secs(30)).await.unwrap().unwrap();
    assert_eq!(second.receipt.message_id, first.receipt.message_id);
    assert_eq!(second.receive_count, 2);

    assert!(!queue.delete(&first.receipt).await.unwrap());
    assert!(!queue
        .extend_lease(&first.receipt, Duration::from_secs(5))
        .await
        .unwrap());
    assert!(queue.delete(&second.receipt).await.unwrap());
    assert!(queue.receive(Duration::from_secs(30)).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn exhausted_messages_are_dead_lettered() {
    let Some(pool) = setup_db().await else { return };
    let queue = PgWorkQueue::new(pool.clone(), "sync", 2);
    queue.enqueue(&unit("J4", 0)).await.unwrap();
    queue.enqueue(&unit("J5", 0)).await.unwrap();

    let mut seen = HashSet::new();
    for _ in 0..2 {
        while let Some(d) = queue.receive(Duration::from_secs(30)).await.unwrap() {
            seen.insert(d.unit.job_id.clone());
        }
        expire_all(&pool).await;
    }
    assert_eq!(seen.len(), 2);
    assert!(queue.receive(Duration::from_secs(30)).await.unwrap().is_none());

    assert_eq!(queue.max_receives(), 2);
    let parked = queue.dead_letter_exhausted().await.unwrap();
    let parked_jobs: HashSet<_> = parked.iter().map(|p| p.unit.job_id.clone()).collect();
    assert_eq!(parked_jobs, seen);
    assert!(parked.iter().all(|p| p.receive_count == 2 && p.unit.cursor == 0));
    assert!(queue.dead_letter_exhausted().await.unwrap().is_empty());
}
