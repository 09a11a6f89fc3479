// tests/api.rs
mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use common::Harness;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use syncflow::api::{router, ApiState};
use syncflow::jobs::{JobTracker, SAVED_TRACKS_JOB};
use tower::ServiceExt;

fn app(h: &Harness) -> Router {
    router(ApiState {
        service: h.service.clone(),
    })
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let res = app.oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post_job(job_type: &str, body: Value) -> Request<Body> {
    Request::post(format!("/jobs/{job_type}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_job(job_type: &str, job_id: &str) -> Request<Body> {
    Request::get(format!("/jobs/{job_type}/{job_id}"))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn submit_returns_accepted_with_pending_job() {
    let h = Harness::new(100, 5);
    let (status, body) = send(
        app(&h),
        post_job(
            SAVED_TRACKS_JOB,
            json!({"parameters": {"user_id": "u1"}, "access_token": "tok"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "PENDING");
    let job_id = body["job_id"].as_str().unwrap();
    assert_eq!(job_id.len(), 8);
    assert!(job_id.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));

    let units = h.queue.accepted().await;
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].cursor, 0);
    assert_eq!(units[0].job_id, job_id);
}

#[tokio::test]
async fn submit_validation_errors_are_bad_request() {
    let h = Harness::new(100, 5);

    let (status, body) = send(
        app(&h),
        post_job("nope", json!({"parameters": {"user_id": "u1"}, "access_token": "tok"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_PAYLOAD");

    let (status, _) = send(
        app(&h),
        post_job(SAVED_TRACKS_JOB, json!({"parameters": {}, "access_token": "tok"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_codes_follow_job_state() {
    let h = Harness::new(100, 5);

    let (status, body) = send(app(&h), get_job(SAVED_TRACKS_JOB, "ZZZZ9999")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"job_id": "ZZZZ9999", "status": "NOT_FOUND"}));

    let pending = h.submit("u1").await;
    let (status, body) = send(app(&h), get_job(SAVED_TRACKS_JOB, &pending)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "PENDING");
    assert!(body.get("parameters").is_none());

    h.drain().await;
    let (status, body) = send(app(&h), get_job(SAVED_TRACKS_JOB, &pending)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "SUCCEEDED");

    let failed = h.submit("u2").await;
    h.tracker
        .fail(SAVED_TRACKS_JOB, &failed, "UNAUTHORIZED: token expired", Utc::now())
        .await
        .unwrap();
    let (status, body) = send(app(&h), get_job(SAVED_TRACKS_JOB, &failed)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], "FAILED");
    assert_eq!(body["status_message"], "UNAUTHORIZED: token expired");
}

#[tokio::test]
async fn health_is_ok() {
    let h = Harness::new(0, 5);
    let res = app(&h)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}
