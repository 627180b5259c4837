//! HTTP tests for the health and backlog endpoints.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use herald_db::{create_pool, run_migrations, DbRuntimeSettings};
use herald_queue::EventQueueStore;
use herald_server::{app, AppState};
use herald_types::SourceEvent;
use serde_json::Value;
use std::time::Duration;
use tower::ServiceExt; // for oneshot

fn make_state() -> (tempfile::TempDir, AppState) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("api.db");
    let pool = create_pool(path.to_str().unwrap(), DbRuntimeSettings::default()).unwrap();
    let mut conn = pool.get().unwrap();
    run_migrations(&mut conn).unwrap();
    let store = EventQueueStore::new(&conn).unwrap();
    drop(conn);

    let state = AppState {
        pool,
        store,
        operation_timeout: Some(Duration::from_secs(5)),
    };
    (dir, state)
}

fn seed(state: &AppState, destination: &str, ids: &[&str]) {
    let mut conn = state.pool.get().unwrap();
    for id in ids {
        let event = SourceEvent {
            event_id: id.to_string(),
            origin_server_ts: 1_000,
            room_id: "!ops:example.org".to_string(),
            event_type: "m.room.message".to_string(),
            sender: "@alice:example.org".to_string(),
            content: None,
        };
        state
            .store
            .enqueue(&mut conn, &[destination], &event)
            .unwrap();
    }
}

async fn get_json(state: AppState, uri: &str) -> (StatusCode, Value) {
    let response = app(state)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn health_check_returns_ok() {
    let (_dir, state) = make_state();

    let (status, json) = get_json(state, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn destination_backlog_counts_queued_events() {
    let (_dir, state) = make_state();
    seed(&state, "irc-bridge", &["$1", "$2"]);

    let (status, json) = get_json(state, "/destinations/irc-bridge/backlog").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["destinationId"], "irc-bridge");
    assert_eq!(json["queued"], 2);
}

#[tokio::test]
async fn unknown_destination_backlog_is_zero() {
    let (_dir, state) = make_state();

    let (status, json) = get_json(state, "/destinations/never-used/backlog").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["queued"], 0);
}

#[tokio::test]
async fn list_backlog_reports_each_destination() {
    let (_dir, state) = make_state();
    seed(&state, "slack-bridge", &["$1"]);
    seed(&state, "irc-bridge", &["$2", "$3", "$4"]);

    let (status, json) = get_json(state, "/destinations").await;

    assert_eq!(status, StatusCode::OK);
    let destinations = json["destinations"].as_array().unwrap();
    assert_eq!(destinations.len(), 2);
    assert_eq!(destinations[0]["destinationId"], "irc-bridge");
    assert_eq!(destinations[0]["queued"], 3);
    assert_eq!(destinations[1]["destinationId"], "slack-bridge");
    assert_eq!(destinations[1]["queued"], 1);
}

#[tokio::test]
async fn blank_destination_is_bad_request() {
    let (_dir, state) = make_state();

    let (status, json) = get_json(state, "/destinations/%20/backlog").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("destination"));
}
