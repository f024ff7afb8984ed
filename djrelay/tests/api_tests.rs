//! Control API integration tests

mod helpers;

use axum::body::Body;
use http::{Method, Request, StatusCode};
use axum::Router;
use djrelay::api::{self, AppContext};
use djrelay::config::RelayConfig;
use helpers::{Harness, HarnessOptions};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app(harness: &Harness) -> Router {
    api::router(AppContext {
        state: Arc::clone(&harness.state),
        player: harness.player.clone(),
        listeners: Arc::clone(&harness.listeners),
        broadcast: None,
        config: Arc::new(RelayConfig::default()),
    })
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health_and_status() {
    let harness = Harness::start(HarnessOptions::default());
    let app = app(&harness);

    let (status, body) = call(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["module"], "djrelay");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

    let (status, body) = call(&app, Method::GET, "/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "stopped");
    assert_eq!(body["status"], "Player is stopped");

    harness.stop().await;
}

#[tokio::test]
async fn test_listener_and_queue_endpoints() {
    let harness = Harness::start(HarnessOptions::default());
    let app = app(&harness);

    let (status, body) = call(
        &app,
        Method::POST,
        "/listeners/join",
        Some(json!({ "listener": 1, "mode": "voice" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], true);

    // Not queued yet
    let (status, _) = call(&app, Method::POST, "/queue/leave", Some(json!({ "listener": 1 }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(&app, Method::POST, "/queue/join", Some(json!({ "listener": 1 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], true);
    let (_, body) = call(&app, Method::POST, "/queue/join", Some(json!({ "listener": 1 }))).await;
    assert_eq!(body["accepted"], false);

    let (status, _) = call(
        &app,
        Method::POST,
        "/queue/move",
        Some(json!({ "listener": 1, "position": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, Method::POST, "/queue/join", Some(json!({ "listener": 9 }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(&app, Method::GET, "/listeners", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["queue"], json!([1]));
    assert_eq!(body["listeners"][0]["id"], 1);

    let (status, body) = call(
        &app,
        Method::POST,
        "/listeners/leave",
        Some(json!({ "listener": 1, "mode": "voice" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], true);
    assert!(harness.listeners.snapshot().await.queue.is_empty());

    harness.stop().await;
}

#[tokio::test]
async fn test_player_endpoints_map_errors() {
    let harness = Harness::start(HarnessOptions::default());
    let app = app(&harness);
    // Let the initial transition settle
    harness.player.request_stop().await;

    let (status, body) = call(&app, Method::POST, "/player/skip", Some(json!({ "listener": 1 }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("Nothing is playing"));

    let (status, _) = call(&app, Method::POST, "/player/hype", Some(json!({ "listener": 1 }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(&app, Method::POST, "/player/title", Some(json!({ "title": "x" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(&app, Method::POST, "/player/volume", Some(json!({ "percent": 250 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(&app, Method::POST, "/player/volume", Some(json!({ "percent": 80 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["percent"], 80);
    let (_, body) = call(&app, Method::GET, "/player/volume", None).await;
    assert_eq!(body["percent"], 80);

    let (_, body) = call(&app, Method::POST, "/player/stop", None).await;
    assert_eq!(body["accepted"], false);

    let (_, body) = call(&app, Method::POST, "/player/djmode", None).await;
    assert_eq!(body["accepted"], true);

    harness.stop().await;
}

#[tokio::test]
async fn test_token_issue_without_broadcast() {
    let harness = Harness::start(HarnessOptions::default());
    let app = app(&harness);

    let (status, body) = call(&app, Method::POST, "/listeners/5/token", None).await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap();
    assert_eq!(token.len(), djrelay::listeners::TOKEN_LEN);
    assert!(body["stream_url"].is_null());
    assert_eq!(harness.listeners.validate_token(token).await, Ok(5));

    // Unknown listener: nothing to refresh
    let (_, body) = call(&app, Method::POST, "/listeners/5/activity", None).await;
    assert_eq!(body["accepted"], false);

    harness.stop().await;
}
