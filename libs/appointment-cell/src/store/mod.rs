//! Appointment and reschedule-request persistence.
//!
//! Existing rows are only ever written through `compare_and_swap`, which
//! succeeds when the stored `version` still equals the caller's and bumps it.
//! `None` means the row moved on; reload and re-validate before retrying.

pub mod memory;
pub mod supabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentError, AppointmentFilter, PageRequest, RescheduleRequest, Sort,
};

pub use memory::{InMemoryAppointmentStore, InMemoryRescheduleRequestStore};
pub use supabase::{SupabaseAppointmentStore, SupabaseRescheduleRequestStore};

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Fails with `Conflict` when the patient already holds a live appointment at the same instant.
    async fn insert(&self, appointment: &Appointment) -> Result<Appointment, AppointmentError>;

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError>;

    async fn compare_and_swap(
        &self,
        appointment: &Appointment,
        expected_version: i64,
    ) -> Result<Option<Appointment>, AppointmentError>;

    async fn find_live_at(
        &self,
        patient_id: &str,
        scheduled_date: DateTime<Utc>,
    ) -> Result<Option<Appointment>, AppointmentError>;

    async fn search(
        &self,
        filter: &AppointmentFilter,
        sort: Sort,
        page: PageRequest,
    ) -> Result<Vec<Appointment>, AppointmentError>;

    async fn count(&self, filter: &AppointmentFilter) -> Result<usize, AppointmentError>;

    /// Every `pending_acceptance` appointment, oldest first.
    async fn pending_queue(&self, hospital_id: Option<&str>) -> Result<Vec<Appointment>, AppointmentError>;
}

#[async_trait]
pub trait RescheduleRequestStore: Send + Sync {
    async fn insert(&self, request: &RescheduleRequest) -> Result<RescheduleRequest, AppointmentError>;

    async fn get(&self, id: Uuid) -> Result<Option<RescheduleRequest>, AppointmentError>;

    async fn compare_and_swap(
        &self,
        request: &RescheduleRequest,
        expected_version: i64,
    ) -> Result<Option<RescheduleRequest>, AppointmentError>;

    /// Pending requests, oldest first.
    async fn pending(&self) -> Result<Vec<RescheduleRequest>, AppointmentError>;

    async fn for_appointment(&self, appointment_id: Uuid) -> Result<Vec<RescheduleRequest>, AppointmentError>;
}
