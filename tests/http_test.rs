//! HTTP surface tests, driven through `tower::ServiceExt::oneshot`.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{Duration as ChronoDuration, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use herald::providers::LocalMailer;
use herald::{
    Address, DeliveryStore, MemoryAdvisoryStore, MemoryDeliveryStore, MemoryJobStore,
    MemoryTrackingStore, Scheduler, TrackingOptions, TrackingService,
};

struct Stack {
    app: Router,
    tracking: Arc<TrackingService>,
    records: Arc<MemoryDeliveryStore>,
}

fn stack() -> Stack {
    let records = MemoryDeliveryStore::shared();
    let tracking = Arc::new(TrackingService::new(MemoryTrackingStore::shared()));
    let scheduler = Scheduler::new(
        records.clone(),
        MemoryJobStore::shared(),
        MemoryAdvisoryStore::shared(),
        Arc::new(LocalMailer::new()),
        Arc::clone(&tracking),
        Address::new("alerts@example.com"),
    );
    let app = herald::http::router(scheduler, Arc::clone(&tracking));
    Stack {
        app,
        tracking,
        records,
    }
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Vec<u8>, axum::http::HeaderMap) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec(), headers)
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

// ============================================================================
// Beacon endpoint
// ============================================================================

#[tokio::test]
async fn pixel_serves_gif_for_unknown_id_and_records_nothing() {
    let stack = stack();
    let (status, body, headers) = get(&stack.app, "/track/pixel?t=et_unknown").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "image/gif");
    assert_eq!(&body[..6], b"GIF89a");

    assert!(stack.tracking.events("et_unknown").await.unwrap().is_empty());
}

#[tokio::test]
async fn pixel_serves_gif_even_without_id() {
    let stack = stack();
    let (status, body, _) = get(&stack.app, "/track/pixel").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..6], b"GIF89a");
}

#[tokio::test]
async fn pixel_records_open_for_known_id() {
    let stack = stack();
    let handles = stack
        .tracking
        .issue("adv-1", "soc@example.com", TrackingOptions::default())
        .await
        .unwrap();

    let response = stack
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/track/pixel?t={}", handles.tracking_id))
                .header("x-forwarded-for", "203.0.113.9")
                .header(header::USER_AGENT, "Mozilla/5.0 (iPhone) Version/17.0 Mobile Safari/604.1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let events = stack.tracking.events(&handles.tracking_id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].ip_address, "203.0.113.9");
}

// ============================================================================
// Link endpoint
// ============================================================================

#[tokio::test]
async fn link_redirects_to_exact_destination_and_records_click() {
    let stack = stack();
    let handles = stack
        .tracking
        .issue("adv-1", "soc@example.com", TrackingOptions::default())
        .await
        .unwrap();

    let uri = format!(
        "/track/link?t={}&u=https%3A%2F%2Fexample.com%2Fx&l=ref_0",
        handles.tracking_id
    );
    let (status, _, headers) = get(&stack.app, &uri).await;

    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(headers[header::LOCATION], "https://example.com/x");

    let events = stack.tracking.events(&handles.tracking_id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].link_url.as_deref(), Some("https://example.com/x"));
    assert_eq!(events[0].link_id.as_deref(), Some("ref_0"));
}

#[tokio::test]
async fn link_still_redirects_for_unknown_id_without_recording() {
    let stack = stack();
    let (status, _, headers) =
        get(&stack.app, "/track/link?t=et_unknown&u=https%3A%2F%2Fexample.com%2Fx").await;

    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(headers[header::LOCATION], "https://example.com/x");
    assert!(stack.tracking.events("et_unknown").await.unwrap().is_empty());
}

#[tokio::test]
async fn link_rejects_missing_parameters() {
    let stack = stack();
    let (status, _, _) = get(&stack.app, "/track/link?t=et_1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = get(&stack.app, "/track/link?u=https%3A%2F%2Fexample.com").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn link_rejects_unsafe_destinations() {
    let stack = stack();
    for destination in [
        "not-a-url",
        "%2Frelative%2Fpath",
        "javascript%3Aalert(1)",
        "http%3A%2F%2Flocalhost%2Fadmin",
        "http%3A%2F%2F127.0.0.1%2F",
        "http%3A%2F%2F192.168.1.1%2F",
    ] {
        let uri = format!("/track/link?t=et_1&u={}", destination);
        let (status, _, _) = get(&stack.app, &uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "destination: {destination}");
    }
}

// ============================================================================
// Schedule management
// ============================================================================

fn schedule_body(offset: ChronoDuration) -> Value {
    json!({
        "advisory_ref": "adv-1",
        "to": [{"email": "soc@example.com"}],
        "cc": [{"email": "ciso@example.com"}, {"email": "CISO@example.com"}],
        "subject": "THREAT ADVISORY: test",
        "operator_message": "Check this.",
        "scheduled_at": (Utc::now() + offset).to_rfc3339(),
        "created_by": "operator-1"
    })
}

#[tokio::test]
async fn create_schedule_returns_created_record() {
    let stack = stack();
    let (status, body) = post_json(
        &stack.app,
        "/schedules",
        schedule_body(ChronoDuration::hours(2)),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["state"], "pending");
    assert_eq!(body["retry_count"], 0);
    // cc was silently deduplicated.
    assert_eq!(body["cc"].as_array().unwrap().len(), 1);
    assert!(body["id"].as_str().is_some());
}

#[tokio::test]
async fn create_schedule_rejects_past_time_and_empty_recipients() {
    let stack = stack();

    let (status, body) = post_json(
        &stack.app,
        "/schedules",
        schedule_body(ChronoDuration::hours(-1)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("future"));

    let mut no_recipients = schedule_body(ChronoDuration::hours(1));
    no_recipients["to"] = json!([]);
    let (status, _) = post_json(&stack.app, "/schedules", no_recipients).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn schedule_crud_roundtrip() {
    let stack = stack();
    let (_, created) = post_json(
        &stack.app,
        "/schedules",
        schedule_body(ChronoDuration::hours(2)),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();

    // Read it back.
    let (status, body, _) = get(&stack.app, &format!("/schedules/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    let fetched: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(fetched["subject"], "THREAT ADVISORY: test");

    // Listed.
    let (status, body, _) = get(&stack.app, "/schedules?state=pending").await;
    assert_eq!(status, StatusCode::OK);
    let listed: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(listed["schedules"].as_array().unwrap().len(), 1);

    // Cancel.
    let (status, cancelled) =
        post_json(&stack.app, &format!("/schedules/{}/cancel", id), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["state"], "cancelled");

    // A second cancel conflicts.
    let (status, _) =
        post_json(&stack.app, &format!("/schedules/{}/cancel", id), json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Missing record is a 404.
    let (status, _, _) = get(&stack.app, "/schedules/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_requires_elevation_for_terminal_records() {
    let stack = stack();
    let (_, created) = post_json(
        &stack.app,
        "/schedules",
        schedule_body(ChronoDuration::hours(2)),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();
    stack.records.mark_sent(&id, Utc::now()).await.unwrap();

    let response = stack
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/schedules/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = stack
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/schedules/{}?elevated=true", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn update_endpoint_rejects_terminal_records() {
    let stack = stack();
    let (_, created) = post_json(
        &stack.app,
        "/schedules",
        schedule_body(ChronoDuration::hours(2)),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();
    post_json(&stack.app, &format!("/schedules/{}/cancel", id), json!({})).await;

    let response = stack
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(format!("/schedules/{}", id))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"subject": "too late"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

// ============================================================================
// Analytics
// ============================================================================

#[tokio::test]
async fn analytics_returns_page_and_aggregate() {
    let stack = stack();
    let handles = stack
        .tracking
        .issue("adv-1", "soc@example.com", TrackingOptions::default())
        .await
        .unwrap();
    get(
        &stack.app,
        &format!("/track/pixel?t={}", handles.tracking_id),
    )
    .await;

    let (status, body, _) = get(&stack.app, "/tracking/analytics?email_id=adv-1").await;
    assert_eq!(status, StatusCode::OK);
    let page: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(page["total"], 1);
    assert_eq!(page["aggregate"]["total_opens"], 1);
    assert_eq!(page["aggregate"]["open_rate"], 100.0);

    let (status, body, _) = get(
        &stack.app,
        &format!("/tracking/{}/events", handles.tracking_id),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let events: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(events["events"].as_array().unwrap().len(), 1);
}
