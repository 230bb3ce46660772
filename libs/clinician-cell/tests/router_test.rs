use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use audit_cell::{AuditTrail, RecordingAuditPublisher};
use clinician_cell::services::StaticRoster;
use clinician_cell::store::{InMemoryAvailabilityStore, InMemoryTrackerStore};
use clinician_cell::{clinician_routes, ClinicianState};
use shared_config::SchedulingConfig;
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

fn app() -> Router {
    let state = ClinicianState::with_stores(
        TestConfig::default().to_arc(),
        Arc::new(InMemoryAvailabilityStore::new()),
        Arc::new(InMemoryTrackerStore::new()),
        Arc::new(StaticRoster::from_pairs(&[("D1", "Dr One")])),
        AuditTrail::new(Arc::new(RecordingAuditPublisher::new())),
        SchedulingConfig::default(),
    );
    clinician_routes(Arc::new(state))
}

fn request(method: &str, uri: &str, user: &TestUser, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", JwtTestUtils::bearer(user))
        .header("Content-Type", "application/json");
    match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let response = app()
        .oneshot(Request::builder().uri("/available").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_status_update_then_listing() {
    let app = app();
    let doctor = TestUser::doctor("d1@example.com").with_id("D1");

    let response = app.clone()
        .oneshot(request("PUT", "/me/status", &doctor, Some(json!({
            "status": "available",
            "hospital_id": "H1"
        }))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["clinician_id"], json!("D1"));

    let response = app.clone()
        .oneshot(request("GET", "/available?hospital_id=H1", &doctor, None))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["total"], json!(1));

    let response = app
        .oneshot(request("GET", "/D1/availability", &doctor, None))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["status"], json!("available"));
}

#[tokio::test]
async fn test_non_clinician_cannot_set_status() {
    let receptionist = TestUser::default();
    let response = app()
        .oneshot(request("PUT", "/me/status", &receptionist, Some(json!({"status": "busy"}))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unknown_clinician_is_not_found() {
    let response = app()
        .oneshot(request("GET", "/nobody/availability", &TestUser::default(), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_roster_reset_requires_admin() {
    let app = app();
    let body = json!({"hospital_id": "H1"});

    let response = app.clone()
        .oneshot(request("POST", "/round-robin/reset", &TestUser::doctor("d@example.com"), Some(body.clone())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.clone()
        .oneshot(request("POST", "/round-robin/reset", &TestUser::admin("a@example.com"), Some(body)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(request("GET", "/round-robin?hospital_id=H1", &TestUser::default(), None))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["clinician_order"], json!([]));
}
