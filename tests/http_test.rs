//! End-to-end tests through the HTTP router.

#![cfg(unix)]

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use common::vital_beacon;
use perftail_lib::core::config::BackendKind;
use perftail_lib::core::ConfigBuilder;
use perftail_lib::live::LiveRead;
use perftail_lib::receiver::BeaconReceiver;
use perftail_lib::storage::{AggregateQuery, Table};
use serde_json::Value;
use tower::ServiceExt;

fn receiver(dir: &tempfile::TempDir) -> BeaconReceiver {
    let config = ConfigBuilder::new()
        .backend(BackendKind::Memory)
        .shm_dir(dir.path().to_path_buf())
        .metrics_enabled(true)
        .build()
        .unwrap();
    BeaconReceiver::from_config(config).unwrap()
}

async fn post_beacon(app: &Router, body: String, site: &str) -> StatusCode {
    let request = Request::post("/perftail/beacon")
        .header("content-type", "application/json")
        .header("x-perftail-site", site)
        .header("cf-ipcountry", "fr")
        .body(Body::from(body))
        .unwrap();
    app.clone().oneshot(request).await.unwrap().status()
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_beacon_reaches_every_sink() {
    let dir = tempfile::tempdir().unwrap();
    let receiver = receiver(&dir);
    let app = receiver.router();

    let body = vital_beacon("/products/shoes/red", &[("LCP", 2.1), ("CLS", 0.05)]).to_string();
    assert_eq!(post_beacon(&app, body, "3").await, StatusCode::ACCEPTED);

    let store = receiver.capture().store().unwrap();
    let rows = store
        .query(&AggregateQuery::new(Table::Statistics).group_by("site").group_by("country").sum("LCP_sum"))
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].hits(), 1);
    assert_eq!(rows[0].sum("LCP_sum"), 2100);
    assert_eq!(format!("{:?}", rows[0].dimensions.get("country").unwrap()), "Text(\"FR\")");

    let gauges = receiver.gauges().unwrap();
    assert_eq!(gauges.get("perftail_webvital_lcp"), Some(2.1));
    assert_eq!(gauges.get("perftail_webvital_cls"), Some(0.05));
}

#[tokio::test]
async fn test_malformed_beacon_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = receiver(&dir).router();

    assert_eq!(post_beacon(&app, "{broken".to_string(), "1").await, StatusCode::BAD_REQUEST);
    let missing = r#"{"type":"webvital","authenticated":0,"metrics":[{"name":"LCP","value":1}]}"#;
    assert_eq!(post_beacon(&app, missing.to_string(), "1").await, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_live_cursor_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let app = receiver(&dir).router();

    let seed = vital_beacon("/seed", &[("LCP", 1.0)]).to_string();
    assert_eq!(post_beacon(&app, seed, "1").await, StatusCode::ACCEPTED);
    let (status, start) = get_json(&app, "/perftail/live?index=0").await;
    assert_eq!(status, StatusCode::OK);
    let start: LiveRead = serde_json::from_value(start).unwrap();
    assert!(start.items.is_empty());

    let next = vital_beacon("/checkout", &[("INP", 0.25)]).to_string();
    assert_eq!(post_beacon(&app, next, "7").await, StatusCode::ACCEPTED);

    let uri = format!("/perftail/live?index={}&filter=webvital&site=%5E7%24", start.index);
    let (status, body) = get_json(&app, &uri).await;
    assert_eq!(status, StatusCode::OK);
    let read: LiveRead = serde_json::from_value(body.clone()).unwrap();
    assert_eq!(read.items.len(), 1);
    assert_ne!(read.index, start.index);
    let (_, item) = body["items"].as_object().unwrap().iter().next().unwrap();
    assert_eq!(item["type"], "webvital");
    assert!(item["line"].as_str().unwrap().contains("/checkout"));
}

#[tokio::test]
async fn test_live_rejects_bad_filters() {
    let dir = tempfile::tempdir().unwrap();
    let app = receiver(&dir).router();

    let (status, body) = get_json(&app, "/perftail/live?index=0&endpoint=%5B").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);

    let (status, _) = get_json(&app, "/perftail/live?filter=paint").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health() {
    let dir = tempfile::tempdir().unwrap();
    let app = receiver(&dir).router();
    let (status, body) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["live_available"], true);
}
