use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::models::{
    Appointment, AppointmentStatus, AppointmentType, Priority, Scenario,
};
use appointment_cell::services::clinical::{
    ClinicalService, ClinicalServiceClient, DischargeRequest, EncounterRequest,
};
use appointment_cell::services::{ClinicalDispatcher, FollowUp, RecordingClinicalService};
use shared_utils::test_utils::TestConfig;

fn appointment(scenario: Scenario, patient_id: Option<&str>) -> Appointment {
    let now = Utc::now();
    Appointment {
        id: Uuid::new_v4(),
        patient_id: patient_id.map(str::to_string),
        patient_chi: Some("0101011234".to_string()),
        patient_name: None,
        doctor_id: Some("D1".to_string()),
        doctor_name: Some("Dr One".to_string()),
        hospital_id: "H1".to_string(),
        department_id: Some("ER".to_string()),
        scenario,
        appointment_type: AppointmentType::Consultation,
        scheduled_date: now,
        end_time: None,
        duration_minutes: 30,
        status: AppointmentStatus::Confirmed,
        priority: Priority::Normal,
        reason: Some("Headache".to_string()),
        notes: None,
        history: Vec::new(),
        auto_assigned: false,
        is_emergency_unknown: false,
        emergency_alias: None,
        emergency_conditions: None,
        preferred_clinician_id: None,
        preferred_clinician_name: None,
        accepted_by_id: None,
        accepted_at: None,
        referred_by_id: None,
        created_by: None,
        version: 0,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn test_client_posts_camel_case_encounter() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/encounters"))
        .and(body_partial_json(json!({
            "patientId": "P1",
            "hospitalId": "H1",
            "encounterType": "outpatient",
            "admittingDoctorId": "D1"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "enc-9"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/discharge"))
        .and(body_partial_json(json!({"encounterId": "enc-9", "patientId": "P1"})))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let client = ClinicalServiceClient::new(&TestConfig::with_mock_server(&server.uri()).to_app_config());
    let encounter = client
        .create_encounter(&EncounterRequest {
            patient_id: "P1".to_string(),
            patient_chi: None,
            hospital_id: "H1".to_string(),
            department_id: None,
            encounter_type: "outpatient".to_string(),
            admitting_doctor_id: Some("D1".to_string()),
            admission_date: Utc::now(),
            chief_complaint: None,
        })
        .await
        .unwrap();
    assert_eq!(encounter.id, "enc-9");

    client
        .create_discharge(&DischargeRequest {
            encounter_id: encounter.id,
            patient_id: "P1".to_string(),
            patient_chi: None,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_client_reports_service_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/encounters"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let client = ClinicalServiceClient::new(&TestConfig::with_mock_server(&server.uri()).to_app_config());
    let result = client
        .create_encounter(&EncounterRequest {
            patient_id: "P1".to_string(),
            patient_chi: None,
            hospital_id: "H1".to_string(),
            department_id: None,
            encounter_type: "emergency".to_string(),
            admitting_doctor_id: None,
            admission_date: Utc::now(),
            chief_complaint: None,
        })
        .await;

    let message = result.unwrap_err().to_string();
    assert!(message.contains("503"));
}

#[tokio::test]
async fn test_dispatcher_maps_scenario_to_encounter_type() {
    let clinical = Arc::new(RecordingClinicalService::new());
    let dispatcher = ClinicalDispatcher::new(clinical.clone());

    dispatcher.dispatch(&appointment(Scenario::Emergency, Some("P1")), vec![FollowUp::OpenEncounter { discharge: false }]);
    dispatcher.dispatch(&appointment(Scenario::Scheduled, Some("P2")), vec![FollowUp::OpenEncounter { discharge: false }]);

    let encounters = clinical.wait_for_encounters(2).await;
    let mut types: Vec<(String, String)> = encounters
        .into_iter()
        .map(|e| (e.patient_id, e.encounter_type))
        .collect();
    types.sort();
    assert_eq!(types, vec![
        ("P1".to_string(), "emergency".to_string()),
        ("P2".to_string(), "outpatient".to_string()),
    ]);
    assert!(clinical.discharges().is_empty());
}

#[tokio::test]
async fn test_dispatcher_skips_appointments_without_patient() {
    let clinical = Arc::new(RecordingClinicalService::new());
    let dispatcher = ClinicalDispatcher::new(clinical.clone());

    dispatcher.dispatch(&appointment(Scenario::WalkIn, None), vec![FollowUp::OpenEncounter { discharge: true }]);

    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert!(clinical.encounters().is_empty());
}

#[tokio::test]
async fn test_failed_encounter_skips_discharge() {
    let clinical = Arc::new(RecordingClinicalService::failing());
    let dispatcher = ClinicalDispatcher::new(clinical.clone());

    dispatcher.dispatch(&appointment(Scenario::WalkIn, Some("P1")), vec![FollowUp::OpenEncounter { discharge: true }]);

    assert_eq!(clinical.wait_for_encounters(1).await.len(), 1);
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert!(clinical.discharges().is_empty());
}
