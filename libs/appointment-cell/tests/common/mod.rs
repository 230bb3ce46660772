#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use appointment_cell::models::{
    Appointment, AppointmentError, AppointmentFilter, CreateAppointmentRequest, PageRequest,
    Priority, RescheduleRequest, Scenario, Sort,
};
use appointment_cell::services::{ClinicalDispatcher, RecordingClinicalService};
use appointment_cell::store::{
    AppointmentStore, InMemoryAppointmentStore, InMemoryRescheduleRequestStore,
    RescheduleRequestStore,
};
use appointment_cell::AppointmentState;
use audit_cell::{AuditTrail, RecordingAuditPublisher};
use clinician_cell::models::{ClinicianStatus, SetStatusRequest};
use clinician_cell::services::StaticRoster;
use clinician_cell::store::{InMemoryAvailabilityStore, InMemoryTrackerStore};
use clinician_cell::ClinicianState;
use shared_config::SchedulingConfig;
use shared_models::auth::Actor;
use shared_utils::test_utils::{TestConfig, TestUser};

pub struct Harness {
    pub state: Arc<AppointmentState>,
    pub clinicians: Arc<ClinicianState>,
    pub store: Arc<FaultyAppointmentStore>,
    pub request_store: Arc<FaultyRequestStore>,
    pub clinical: Arc<RecordingClinicalService>,
    pub audit: Arc<RecordingAuditPublisher>,
}

impl Harness {
    pub fn new(roster: StaticRoster) -> Self {
        Self::with_clinical(roster, RecordingClinicalService::new())
    }

    pub fn with_clinical(roster: StaticRoster, clinical: RecordingClinicalService) -> Self {
        let config = TestConfig::default().to_arc();
        let audit = Arc::new(RecordingAuditPublisher::new());
        let trail = AuditTrail::new(audit.clone());

        let clinicians = ClinicianState::with_stores(
            config.clone(),
            Arc::new(InMemoryAvailabilityStore::new()),
            Arc::new(InMemoryTrackerStore::new()),
            Arc::new(roster),
            trail.clone(),
            SchedulingConfig::default(),
        );

        let store = Arc::new(FaultyAppointmentStore::default());
        let request_store = Arc::new(FaultyRequestStore::default());
        let clinical = Arc::new(clinical);
        let state = AppointmentState::with_stores(
            config,
            store.clone(),
            request_store.clone(),
            &clinicians,
            ClinicalDispatcher::new(clinical.clone()),
            trail,
        );

        Self {
            state: Arc::new(state),
            clinicians: Arc::new(clinicians),
            store,
            request_store,
            clinical,
            audit,
        }
    }

    pub async fn go_available(&self, id: &str, hospital_id: &str) {
        self.clinicians.availability
            .set_status(&doctor(id), SetStatusRequest {
                status: ClinicianStatus::Available,
                hospital_id: Some(hospital_id.to_string()),
                department_id: None,
            })
            .await
            .unwrap();
    }

    pub async fn blocked_slots(&self, clinician_id: &str) -> usize {
        self.clinicians.availability
            .get(clinician_id)
            .await
            .map(|record| record.blocked_slots.len())
            .unwrap_or(0)
    }
}

pub fn doctor(id: &str) -> Actor {
    let mut user = TestUser::doctor(&format!("{}@example.com", id.to_lowercase())).with_id(id);
    user.full_name = format!("Dr {}", id);
    user.to_actor()
}

pub fn receptionist() -> Actor {
    TestUser::default().with_id("R1").to_actor()
}

pub fn admin() -> Actor {
    TestUser::admin("admin@example.com").with_id("A1").to_actor()
}

pub fn emergency(patient_id: &str) -> CreateAppointmentRequest {
    CreateAppointmentRequest {
        patient_id: Some(patient_id.to_string()),
        patient_chi: Some("0101011234".to_string()),
        hospital_id: "H1".to_string(),
        scenario: Some(Scenario::Emergency),
        reason: Some("Chest pain".to_string()),
        ..Default::default()
    }
}

pub fn scheduled(patient_id: &str, at: DateTime<Utc>) -> CreateAppointmentRequest {
    CreateAppointmentRequest {
        patient_id: Some(patient_id.to_string()),
        hospital_id: "H1".to_string(),
        scenario: Some(Scenario::Scheduled),
        scheduled_date: Some(at),
        reason: Some("Follow-up".to_string()),
        ..Default::default()
    }
}

pub fn scheduled_with(patient_id: &str, at: DateTime<Utc>, doctor_id: &str) -> CreateAppointmentRequest {
    CreateAppointmentRequest {
        doctor_id: Some(doctor_id.to_string()),
        doctor_name: Some(format!("Dr {}", doctor_id)),
        ..scheduled(patient_id, at)
    }
}

pub fn queued(patient_id: &str, at: DateTime<Utc>, priority: Priority) -> CreateAppointmentRequest {
    CreateAppointmentRequest {
        priority: Some(priority),
        ..scheduled(patient_id, at)
    }
}

fn refused(what: &str) -> AppointmentError {
    AppointmentError::Database(format!("{} refused by test store", what))
}

/// In-memory appointment store whose inserts and conditional writes can be
/// switched to fail.
#[derive(Default)]
pub struct FaultyAppointmentStore {
    inner: InMemoryAppointmentStore,
    pub fail_inserts: AtomicBool,
    pub fail_writes: AtomicBool,
}

impl FaultyAppointmentStore {
    pub async fn all(&self) -> Vec<Appointment> {
        self.inner.all().await
    }
}

#[async_trait]
impl AppointmentStore for FaultyAppointmentStore {
    async fn insert(&self, appointment: &Appointment) -> Result<Appointment, AppointmentError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(refused("insert"));
        }
        self.inner.insert(appointment).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        self.inner.get(id).await
    }

    async fn compare_and_swap(
        &self,
        appointment: &Appointment,
        expected_version: i64,
    ) -> Result<Option<Appointment>, AppointmentError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(refused("update"));
        }
        self.inner.compare_and_swap(appointment, expected_version).await
    }

    async fn find_live_at(
        &self,
        patient_id: &str,
        scheduled_date: DateTime<Utc>,
    ) -> Result<Option<Appointment>, AppointmentError> {
        self.inner.find_live_at(patient_id, scheduled_date).await
    }

    async fn search(
        &self,
        filter: &AppointmentFilter,
        sort: Sort,
        page: PageRequest,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        self.inner.search(filter, sort, page).await
    }

    async fn count(&self, filter: &AppointmentFilter) -> Result<usize, AppointmentError> {
        self.inner.count(filter).await
    }

    async fn pending_queue(&self, hospital_id: Option<&str>) -> Result<Vec<Appointment>, AppointmentError> {
        self.inner.pending_queue(hospital_id).await
    }
}

/// In-memory request store whose inserts can be switched to fail.
#[derive(Default)]
pub struct FaultyRequestStore {
    inner: InMemoryRescheduleRequestStore,
    pub fail_inserts: AtomicBool,
}

#[async_trait]
impl RescheduleRequestStore for FaultyRequestStore {
    async fn insert(&self, request: &RescheduleRequest) -> Result<RescheduleRequest, AppointmentError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(refused("insert"));
        }
        self.inner.insert(request).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<RescheduleRequest>, AppointmentError> {
        self.inner.get(id).await
    }

    async fn compare_and_swap(
        &self,
        request: &RescheduleRequest,
        expected_version: i64,
    ) -> Result<Option<RescheduleRequest>, AppointmentError> {
        self.inner.compare_and_swap(request, expected_version).await
    }

    async fn pending(&self) -> Result<Vec<RescheduleRequest>, AppointmentError> {
        self.inner.pending().await
    }

    async fn for_appointment(&self, appointment_id: Uuid) -> Result<Vec<RescheduleRequest>, AppointmentError> {
        self.inner.for_appointment(appointment_id).await
    }
}
