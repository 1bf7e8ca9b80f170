use super::common::*;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::workflows::collections::delivery::TRACKING_PIXEL;
use crate::workflows::collections::domain::{CommunicationStatus, TenantPlan};
use crate::workflows::collections::router::collections_router;

fn router(harness: &Harness) -> Router {
    collections_router(Arc::clone(&harness.service))
}

fn post_json(uri: &str, payload: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .expect("request builds")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request builds")
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body reads");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn start_then_execute_over_http() {
    let harness = Harness::new(TenantPlan::Pro, vec![email(1, 0)]);
    harness.store.put_debtor(debtor("deb-1"));

    let response = router(&harness)
        .oneshot(post_json(
            "/api/v1/workflows/start",
            json!({ "debtor_id": "deb-1", "workflow_id": WORKFLOW }),
        ))
        .await
        .expect("router responds");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["workflow_id"], json!(WORKFLOW));

    let response = router(&harness)
        .oneshot(post_json("/execute-workflows", json!({})))
        .await
        .expect("router responds");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["executed"], json!(1));
    assert_eq!(body["errors"], json!([]));
    assert_eq!(harness.channels.emails().len(), 1);
}

#[tokio::test]
async fn duplicate_start_reports_failure_with_conflict() {
    let harness = Harness::new(TenantPlan::Pro, vec![email(1, 0)]);
    harness.enroll("deb-1", t0());

    let response = router(&harness)
        .oneshot(post_json(
            "/api/v1/workflows/start",
            json!({ "debtor_id": "deb-1" }),
        ))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = json_body(response).await;
    assert_eq!(body["success"], json!(false));
    assert!(body["error"]
        .as_str()
        .is_some_and(|error| error.contains("already has an active enrollment")));
}

#[tokio::test]
async fn stop_and_timeline_endpoints() {
    let harness = Harness::new(TenantPlan::Pro, vec![email(1, 0)]);
    harness.enroll("deb-1", t0());

    let response = router(&harness)
        .oneshot(post_json(
            "/api/v1/workflows/stop",
            json!({ "debtor_id": "deb-1", "reason": "paid by phone" }),
        ))
        .await
        .expect("router responds");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["success"], json!(true));

    let response = router(&harness)
        .oneshot(get("/api/v1/debtors/deb-1/enrollment"))
        .await
        .expect("router responds");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["enrollment"]["status"], json!("stopped"));
    assert_eq!(body["enrollment"]["note"], json!("paid by phone"));
    assert_eq!(body["executions"][0]["status"], json!("skipped"));

    let response = router(&harness)
        .oneshot(get("/api/v1/debtors/deb-unknown/enrollment"))
        .await
        .expect("router responds");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn retry_without_a_failed_step_is_unprocessable() {
    let harness = Harness::new(TenantPlan::Pro, vec![email(1, 0)]);
    harness.enroll("deb-1", t0());

    let response = router(&harness)
        .oneshot(post_json(
            "/api/v1/workflows/retry",
            json!({ "debtor_id": "deb-1" }),
        ))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(response).await["success"], json!(false));
}

#[tokio::test]
async fn open_beacon_always_returns_the_pixel() {
    let harness = Harness::new(TenantPlan::Pro, vec![email(1, 0)]);
    harness.enroll("deb-1", t0());
    harness.service.execute_workflows(t0(), None).await.expect("poll");
    let correlation_id = harness.store.communications()[0].correlation_id.clone();

    for uri in [
        "/open".to_string(),
        "/open?id=unknown".to_string(),
        format!("/open?id={correlation_id}"),
    ] {
        let response = router(&harness)
            .oneshot(get(&uri))
            .await
            .expect("router responds");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/gif");
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body reads");
        assert_eq!(&bytes[..], TRACKING_PIXEL);
    }

    let record = &harness.store.communications()[0];
    assert_eq!(record.status, CommunicationStatus::Opened);
    assert!(record.opened_at.is_some());
}

#[tokio::test]
async fn delivery_events_are_applied_once() {
    let harness = Harness::new(TenantPlan::Pro, vec![email(1, 0)]);
    harness.enroll("deb-1", t0());
    harness.service.execute_workflows(t0(), None).await.expect("poll");
    let correlation_id = harness.store.communications()[0].correlation_id.clone();

    let events = json!([
        { "event_id": "e1", "correlation_id": correlation_id, "event": "delivered", "timestamp": "2026-03-02T09:01:00Z" },
        { "event_id": "e1", "correlation_id": correlation_id, "event": "delivered", "timestamp": "2026-03-02T09:01:00Z" },
        { "event_id": "e2", "correlation_id": "someone-else", "event": "click", "timestamp": "2026-03-02T09:05:00Z" },
    ]);

    let response = router(&harness)
        .oneshot(post_json("/delivery-events", events))
        .await
        .expect("router responds");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["applied"], json!(1));
    assert_eq!(body["duplicates"], json!(1));
    assert_eq!(body["unmatched"], json!(1));

    let record = &harness.store.communications()[0];
    assert_eq!(record.status, CommunicationStatus::Delivered);

    // enrollment progression is untouched by delivery events
    assert_eq!(harness.enrollment("deb-1").current_step_number, 1);
}

#[tokio::test]
async fn unreadable_due_rows_still_answer_ok_with_errors() {
    let harness = FaultyHarness::new(TenantPlan::Pro, vec![email(1, 0)]);
    harness.enroll("deb-1", t0());
    harness.store.fail_due_reads(1);

    let response = collections_router(Arc::clone(&harness.service))
        .oneshot(post_json("/execute-workflows", json!({})))
        .await
        .expect("router responds");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["executed"], json!(0));
    let errors = body["errors"].as_array().expect("errors array");
    assert_eq!(errors.len(), 1);
    assert!(errors[0]
        .as_str()
        .is_some_and(|message| message.contains("injected fault")));
    assert!(harness.channels.emails().is_empty());
}
