mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

use appointment_cell::{appointment_routes, reschedule_request_routes};
use clinician_cell::services::StaticRoster;
use shared_utils::test_utils::{JwtTestUtils, TestUser};

use common::Harness;

fn apps() -> (Router, Router) {
    let harness = Harness::new(StaticRoster::empty());
    (
        appointment_routes(harness.state.clone()),
        reschedule_request_routes(harness.state.clone()),
    )
}

fn request(method: &str, uri: &str, user: &TestUser, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", JwtTestUtils::bearer(user));
    match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn receptionist() -> TestUser {
    TestUser::default().with_id("R1")
}

fn doctor() -> TestUser {
    TestUser::doctor("d1@example.com").with_id("D1")
}

async fn create_emergency(app: &Router) -> String {
    let response = app.clone()
        .oneshot(request("POST", "/", &receptionist(), Some(json!({
            "patient_id": "P1",
            "hospital_id": "H1",
            "scenario": "emergency",
            "reason": "Fall"
        }))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["status"], json!("pending_acceptance"));
    assert_eq!(body["priority"], json!("urgent"));
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let (appointments, _) = apps();

    let response = appointments
        .oneshot(Request::builder().uri("/queue").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_scheduled_without_date_is_a_validation_error() {
    let (appointments, _) = apps();

    let response = appointments
        .oneshot(request("POST", "/", &receptionist(), Some(json!({
            "patient_id": "P1",
            "hospital_id": "H1"
        }))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_accept_flow_over_http() {
    let (appointments, _) = apps();
    let id = create_emergency(&appointments).await;

    let forbidden = appointments.clone()
        .oneshot(request("POST", &format!("/{}/accept", id), &receptionist(), None))
        .await
        .unwrap();
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let accepted = appointments.clone()
        .oneshot(request("POST", &format!("/{}/accept", id), &doctor(), Some(json!({"notes": "Coming"}))))
        .await
        .unwrap();
    assert_eq!(accepted.status(), StatusCode::OK);
    let body = json_body(accepted).await;
    assert_eq!(body["status"], json!("confirmed"));
    assert_eq!(body["doctor_id"], json!("D1"));

    let twice = appointments.clone()
        .oneshot(request("POST", &format!("/{}/accept", id), &doctor(), None))
        .await
        .unwrap();
    assert_eq!(twice.status(), StatusCode::BAD_REQUEST);

    let fetched = appointments
        .oneshot(request("GET", &format!("/{}", id), &receptionist(), None))
        .await
        .unwrap();
    assert_eq!(fetched.status(), StatusCode::OK);
    assert_eq!(json_body(fetched).await["history"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_unknown_appointment_is_not_found() {
    let (appointments, _) = apps();

    let response = appointments
        .oneshot(request("GET", &format!("/{}", uuid::Uuid::new_v4()), &receptionist(), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_duplicate_booking_is_a_conflict() {
    let (appointments, _) = apps();
    let at = (Utc::now() + Duration::days(1)).to_rfc3339();
    let body = json!({
        "patient_id": "P1",
        "hospital_id": "H1",
        "scenario": "scheduled",
        "scheduled_date": at,
        "doctor_id": "D1"
    });

    let first = appointments.clone()
        .oneshot(request("POST", "/", &receptionist(), Some(body.clone())))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = appointments
        .oneshot(request("POST", "/", &receptionist(), Some(body)))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_cancel_request_round_trip() {
    let (appointments, requests) = apps();
    let id = create_emergency(&appointments).await;

    let opened = appointments.clone()
        .oneshot(request("POST", &format!("/{}/request-cancel", id), &receptionist(), Some(json!({
            "reason": "Patient left"
        }))))
        .await
        .unwrap();
    assert_eq!(opened.status(), StatusCode::CREATED);
    let request_id = json_body(opened).await["id"].as_str().unwrap().to_string();

    let pending = requests.clone()
        .oneshot(request("GET", "/pending", &receptionist(), None))
        .await
        .unwrap();
    assert_eq!(json_body(pending).await["total"], json!(1));

    let not_admin = requests.clone()
        .oneshot(request("POST", &format!("/{}/resolve", request_id), &doctor(), Some(json!({
            "resolution": "approved"
        }))))
        .await
        .unwrap();
    assert_eq!(not_admin.status(), StatusCode::FORBIDDEN);

    let admin = TestUser::admin("admin@example.com").with_id("A1");
    let resolved = requests.clone()
        .oneshot(request("POST", &format!("/{}/resolve", request_id), &admin, Some(json!({
            "resolution": "approved"
        }))))
        .await
        .unwrap();
    assert_eq!(resolved.status(), StatusCode::OK);
    assert_eq!(json_body(resolved).await["status"], json!("approved"));

    let again = requests.clone()
        .oneshot(request("POST", &format!("/{}/resolve", request_id), &admin, Some(json!({
            "resolution": "rejected"
        }))))
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::CONFLICT);

    let history = requests
        .oneshot(request("GET", &format!("/appointment/{}", id), &receptionist(), None))
        .await
        .unwrap();
    assert_eq!(json_body(history).await["total"], json!(1));

    let appointment = appointments
        .oneshot(request("GET", &format!("/{}", id), &receptionist(), None))
        .await
        .unwrap();
    assert_eq!(json_body(appointment).await["status"], json!("cancelled"));
}

#[tokio::test]
async fn test_listing_and_dashboard() {
    let (appointments, _) = apps();
    create_emergency(&appointments).await;

    let listed = appointments.clone()
        .oneshot(request("GET", "/?status=pending_acceptance&limit=5", &receptionist(), None))
        .await
        .unwrap();
    assert_eq!(listed.status(), StatusCode::OK);
    let body = json_body(listed).await;
    assert_eq!(body["total"], json!(1));
    assert_eq!(body["limit"], json!(5));

    let queue = appointments.clone()
        .oneshot(request("GET", "/queue?hospital_id=H1", &receptionist(), None))
        .await
        .unwrap();
    assert_eq!(json_body(queue).await["total"], json!(1));

    let dashboard = appointments
        .oneshot(request("GET", "/dashboard?hospital_id=H1", &receptionist(), None))
        .await
        .unwrap();
    let body = json_body(dashboard).await;
    assert_eq!(body["view"], json!("hospital"));
    assert_eq!(body["pending_acceptance"], json!(1));
}
