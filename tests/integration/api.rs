//! API integration tests.
//!
//! These tests drive the router directly with `oneshot` requests.

use waypoint::api::{ApiState, build_router};
use waypoint::{Definition, InMemoryStore, Outcome, Workflow};

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;

use crate::common::{wait_for_status, wait_for_task};

const QUICK: &str = r#"
groups:
  - id: main
    tasks:
      - {id: a, cmd: "echo a >> log.txt"}
"#;

const SLOW: &str = r#"
groups:
  - id: main
    tasks:
      - {id: slow, cmd: "sleep 30"}
"#;

/// Create a test workflow backed by an in-memory store.
async fn create_workflow(yaml: &str, dir: &TempDir) -> Workflow<InMemoryStore> {
    let definition = Definition::parse(yaml).unwrap();
    Workflow::with_definition(&definition, dir.path(), InMemoryStore::new())
        .await
        .unwrap()
}

async fn send(router: &Router, method: Method, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

/// Test: health endpoint responds with status ok.
#[tokio::test]
async fn test_health_endpoint() {
    let dir = TempDir::new().unwrap();
    let router = build_router(ApiState::new(create_workflow(QUICK, &dir).await));

    let (status, json) = send(&router, Method::GET, "/api/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

/// Test: status endpoint returns the status document.
#[tokio::test]
async fn test_status_endpoint() {
    let dir = TempDir::new().unwrap();
    let router = build_router(ApiState::new(create_workflow(QUICK, &dir).await));

    let (status, json) = send(&router, Method::GET, "/api/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["started"], false);
    assert_eq!(json["finished"], false);
    assert_eq!(json["percent"], 0);
    assert_eq!(json["groups"][0]["id"], "main");
    assert_eq!(json["groups"][0]["tasks"][0]["cmd"], "echo a >> log.txt");
    assert!(json["currentTask"].is_null());
}

/// Test: state endpoint reports a fresh workflow.
#[tokio::test]
async fn test_state_endpoint() {
    let dir = TempDir::new().unwrap();
    let router = build_router(ApiState::new(create_workflow(QUICK, &dir).await));

    let (status, json) = send(&router, Method::GET, "/api/state").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "fresh");
    assert_eq!(json["is_running"], false);
}

/// Test: start runs the workflow in the background and reports the outcome.
#[tokio::test]
async fn test_start_endpoint() {
    let dir = TempDir::new().unwrap();
    let workflow = create_workflow(QUICK, &dir).await;
    let (tx, mut outcomes) = mpsc::unbounded_channel();
    let router = build_router(ApiState::new(workflow.clone()).with_outcomes(tx));

    let (status, json) = send(&router, Method::POST, "/api/start").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["message"], "workflow started");

    let outcome = tokio::time::timeout(Duration::from_secs(10), outcomes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, Outcome::Finished);

    let (_, json) = send(&router, Method::GET, "/api/status").await;
    assert_eq!(json["finished"], true);
    assert_eq!(json["percent"], 100);

    // Starting a finished workflow resets it first.
    let (status, _) = send(&router, Method::POST, "/api/start").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    outcomes.recv().await.unwrap();

    let log = std::fs::read_to_string(dir.path().join("log.txt")).unwrap();
    assert_eq!(log, "a\na\n");
}

/// Test: start and reset conflict with a running workflow, abort stops it.
#[tokio::test]
async fn test_control_while_running() {
    let dir = TempDir::new().unwrap();
    let workflow = create_workflow(SLOW, &dir).await;
    let (tx, mut outcomes) = mpsc::unbounded_channel();
    let router = build_router(ApiState::new(workflow.clone()).with_outcomes(tx));

    let (status, _) = send(&router, Method::POST, "/api/start").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    wait_for_task(&workflow, "slow").await;

    let (status, json) = send(&router, Method::GET, "/api/state").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "running");
    assert_eq!(json["is_running"], true);

    let (status, json) = send(&router, Method::POST, "/api/start").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "CONFLICT");

    let (status, _) = send(&router, Method::POST, "/api/reset").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, json) = send(&router, Method::POST, "/api/abort").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "workflow aborted");

    let outcome = tokio::time::timeout(Duration::from_secs(10), outcomes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, Outcome::Aborted);

    let status = wait_for_status(&workflow, Duration::from_secs(5), |s| s.finished).await;
    assert_eq!(status.error.as_deref(), Some("workflow aborted"));

    let (_, json) = send(&router, Method::GET, "/api/state").await;
    assert_eq!(json["state"], "aborted");
}

/// Test: abort and reset on an idle workflow are conflicts.
#[tokio::test]
async fn test_idle_conflicts() {
    let dir = TempDir::new().unwrap();
    let router = build_router(ApiState::new(create_workflow(QUICK, &dir).await));

    let (status, json) = send(&router, Method::POST, "/api/abort").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "workflow is not running");

    let (status, json) = send(&router, Method::POST, "/api/reset").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "workflow is not finished");
}

/// Test: unknown routes return 404.
#[tokio::test]
async fn test_unknown_route() {
    let dir = TempDir::new().unwrap();
    let router = build_router(ApiState::new(create_workflow(QUICK, &dir).await));

    let (status, _) = send(&router, Method::GET, "/api/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
