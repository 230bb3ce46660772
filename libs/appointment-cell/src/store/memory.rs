use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentError, AppointmentFilter, AppointmentStatus, PageRequest,
    RequestStatus, RescheduleRequest, Sort, SortField, SortOrder,
};
use crate::store::{AppointmentStore, RescheduleRequestStore};

/// Rows kept in insertion order, so ties on timestamps sort stably.
#[derive(Default)]
pub struct InMemoryAppointmentStore {
    rows: Mutex<Vec<Appointment>>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<Appointment> {
        self.rows.lock().await.clone()
    }
}

fn live_at<'a>(rows: &'a [Appointment], patient_id: &str, at: DateTime<Utc>) -> Option<&'a Appointment> {
    rows.iter().find(|a| {
        a.patient_id.as_deref() == Some(patient_id) && a.scheduled_date == at && a.status.is_live()
    })
}

fn compare(a: &Appointment, b: &Appointment, field: SortField) -> Ordering {
    match field {
        SortField::ScheduledDate => a.scheduled_date.cmp(&b.scheduled_date),
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        SortField::Priority => a.priority.rank().cmp(&b.priority.rank()),
        SortField::Status => a.status.to_string().cmp(&b.status.to_string()),
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn insert(&self, appointment: &Appointment) -> Result<Appointment, AppointmentError> {
        let mut rows = self.rows.lock().await;
        if let Some(patient_id) = appointment.patient_id.as_deref() {
            if appointment.status.is_live() {
                if let Some(existing) = live_at(&rows, patient_id, appointment.scheduled_date) {
                    return Err(AppointmentError::Conflict(format!(
                        "Patient {} already has appointment {} at {}",
                        patient_id, existing.id, appointment.scheduled_date
                    )));
                }
            }
        }
        rows.push(appointment.clone());
        Ok(appointment.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        Ok(self.rows.lock().await.iter().find(|a| a.id == id).cloned())
    }

    async fn compare_and_swap(
        &self,
        appointment: &Appointment,
        expected_version: i64,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let mut rows = self.rows.lock().await;
        match rows.iter_mut().find(|a| a.id == appointment.id) {
            Some(stored) if stored.version == expected_version => {
                *stored = appointment.clone();
                stored.version = expected_version + 1;
                Ok(Some(stored.clone()))
            },
            _ => Ok(None),
        }
    }

    async fn find_live_at(
        &self,
        patient_id: &str,
        scheduled_date: DateTime<Utc>,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let rows = self.rows.lock().await;
        Ok(live_at(&rows, patient_id, scheduled_date).cloned())
    }

    async fn search(
        &self,
        filter: &AppointmentFilter,
        sort: Sort,
        page: PageRequest,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let rows = self.rows.lock().await;
        let mut matched: Vec<Appointment> = rows.iter().filter(|a| filter.matches(a)).cloned().collect();
        matched.sort_by(|a, b| {
            let ordering = compare(a, b, sort.field);
            match sort.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        Ok(matched.into_iter()
            .skip(page.offset() as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn count(&self, filter: &AppointmentFilter) -> Result<usize, AppointmentError> {
        Ok(self.rows.lock().await.iter().filter(|a| filter.matches(a)).count())
    }

    async fn pending_queue(&self, hospital_id: Option<&str>) -> Result<Vec<Appointment>, AppointmentError> {
        let rows = self.rows.lock().await;
        let mut pending: Vec<Appointment> = rows.iter()
            .filter(|a| a.status == AppointmentStatus::PendingAcceptance)
            .filter(|a| hospital_id.map_or(true, |h| a.hospital_id == h))
            .cloned()
            .collect();
        pending.sort_by_key(|a| a.created_at);
        Ok(pending)
    }
}

#[derive(Default)]
pub struct InMemoryRescheduleRequestStore {
    rows: Mutex<Vec<RescheduleRequest>>,
}

impl InMemoryRescheduleRequestStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RescheduleRequestStore for InMemoryRescheduleRequestStore {
    async fn insert(&self, request: &RescheduleRequest) -> Result<RescheduleRequest, AppointmentError> {
        self.rows.lock().await.push(request.clone());
        Ok(request.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<RescheduleRequest>, AppointmentError> {
        Ok(self.rows.lock().await.iter().find(|r| r.id == id).cloned())
    }

    async fn compare_and_swap(
        &self,
        request: &RescheduleRequest,
        expected_version: i64,
    ) -> Result<Option<RescheduleRequest>, AppointmentError> {
        let mut rows = self.rows.lock().await;
        match rows.iter_mut().find(|r| r.id == request.id) {
            Some(stored) if stored.version == expected_version => {
                *stored = request.clone();
                stored.version = expected_version + 1;
                Ok(Some(stored.clone()))
            },
            _ => Ok(None),
        }
    }

    async fn pending(&self) -> Result<Vec<RescheduleRequest>, AppointmentError> {
        let rows = self.rows.lock().await;
        let mut pending: Vec<RescheduleRequest> = rows.iter()
            .filter(|r| r.status == RequestStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        Ok(pending)
    }

    async fn for_appointment(&self, appointment_id: Uuid) -> Result<Vec<RescheduleRequest>, AppointmentError> {
        let rows = self.rows.lock().await;
        let mut matched: Vec<RescheduleRequest> = rows.iter()
            .filter(|r| r.appointment_id == appointment_id)
            .cloned()
            .collect();
        matched.sort_by_key(|r| r.created_at);
        Ok(matched)
    }
}
