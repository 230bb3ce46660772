use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use clinician_cell::models::{BlockedSlot, ClinicianStatus, StatusUpdate, TrackerScope};
use clinician_cell::store::{AvailabilityStore, SupabaseAvailabilityStore, SupabaseTrackerStore, TrackerStore};
use shared_database::SupabaseClient;
use shared_utils::test_utils::TestConfig;

fn supabase(server: &MockServer) -> Arc<SupabaseClient> {
    Arc::new(SupabaseClient::new(&TestConfig::with_mock_server(&server.uri()).to_app_config()))
}

fn availability_row(version: i64) -> serde_json::Value {
    json!({
        "id": Uuid::new_v4(),
        "clinician_id": "D1",
        "clinician_name": "Dr One",
        "clinician_role": "doctor",
        "status": "available",
        "hospital_id": "H1",
        "department_id": null,
        "last_status_change": Utc::now().to_rfc3339(),
        "blocked_slots": [],
        "version": version
    })
}

fn tracker_row(version: i64) -> serde_json::Value {
    json!({
        "id": Uuid::new_v4(),
        "hospital_id": "H1",
        "department_id": null,
        "clinician_order": ["D1", "D2"],
        "current_index": 1,
        "last_assigned_clinician_id": null,
        "last_assigned_at": null,
        "version": version,
        "created_at": Utc::now().to_rfc3339(),
        "updated_at": Utc::now().to_rfc3339()
    })
}

#[tokio::test]
async fn test_upsert_status_merges_on_clinician_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/clinician_availability"))
        .and(query_param("on_conflict", "clinician_id"))
        .and(header_exists("Prefer"))
        .and(body_partial_json(json!({"clinician_id": "D1", "status": "available"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([availability_row(0)])))
        .expect(1)
        .mount(&server)
        .await;

    let store = SupabaseAvailabilityStore::new(supabase(&server));
    let record = store.upsert_status(&StatusUpdate {
        clinician_id: "D1".to_string(),
        clinician_name: "Dr One".to_string(),
        clinician_role: Some("doctor".to_string()),
        status: ClinicianStatus::Available,
        hospital_id: Some("H1".to_string()),
        department_id: None,
        last_status_change: Utc::now(),
    }).await.unwrap();

    assert_eq!(record.clinician_name, "Dr One");
}

#[tokio::test]
async fn test_replace_slots_is_conditional_on_version() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/clinician_availability"))
        .and(query_param("clinician_id", "eq.D1"))
        .and(query_param("version", "eq.3"))
        .and(body_partial_json(json!({"version": 4})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([availability_row(4)])))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/clinician_availability"))
        .and(query_param("version", "eq.2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let store = SupabaseAvailabilityStore::new(supabase(&server));
    let now = Utc::now();
    let slots = vec![BlockedSlot { appointment_id: Uuid::new_v4(), start: now, end: now }];

    let written = store.replace_slots("D1", &slots, 3).await.unwrap();
    assert_eq!(written.map(|r| r.version), Some(4));

    let stale = store.replace_slots("D1", &slots, 2).await.unwrap();
    assert!(stale.is_none());
}

#[tokio::test]
async fn test_list_available_applies_scope_filters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/clinician_availability"))
        .and(query_param("status", "eq.available"))
        .and(query_param("hospital_id", "eq.H1"))
        .and(query_param("department_id", "eq.ER"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([availability_row(0)])))
        .mount(&server)
        .await;

    let store = SupabaseAvailabilityStore::new(supabase(&server));
    let rows = store.list_available(Some("H1"), Some("ER")).await.unwrap();

    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_tracker_creation_race_rereads_the_winner() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/round_robin_trackers"))
        .and(query_param("department_id", "is.null"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/round_robin_trackers"))
        .respond_with(ResponseTemplate::new(409).set_body_string("duplicate key value violates unique constraint"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/round_robin_trackers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([tracker_row(7)])))
        .mount(&server)
        .await;

    let store = SupabaseTrackerStore::new(supabase(&server));
    let tracker = store.find_or_create(&TrackerScope::new("H1", None)).await.unwrap();

    assert_eq!(tracker.version, 7);
    assert_eq!(tracker.clinician_order, vec!["D1", "D2"]);
}

#[tokio::test]
async fn test_tracker_swap_reports_lost_race() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/round_robin_trackers"))
        .and(query_param("version", "eq.5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let store = SupabaseTrackerStore::new(supabase(&server));
    let mut tracker = clinician_cell::models::RoundRobinTracker::new(&TrackerScope::new("H1", None));
    tracker.version = 5;

    assert!(store.compare_and_swap(&tracker, 5).await.unwrap().is_none());
}
