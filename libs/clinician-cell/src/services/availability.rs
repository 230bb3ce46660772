use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use audit_cell::{AuditEvent, AuditResource, AuditTrail};
use shared_config::SchedulingConfig;
use shared_models::auth::Actor;

use crate::models::{
    ClinicianAvailability, ClinicianError, SetStatusRequest, StatusUpdate,
};
use crate::store::AvailabilityStore;

/// The availability ledger: live clinician status plus the time windows
/// appointments hold on each clinician's calendar.
pub struct AvailabilityService {
    store: Arc<dyn AvailabilityStore>,
    audit: AuditTrail,
    max_write_attempts: u32,
}

impl AvailabilityService {
    pub fn new(store: Arc<dyn AvailabilityStore>, audit: AuditTrail, config: &SchedulingConfig) -> Self {
        Self {
            store,
            audit,
            max_write_attempts: config.max_write_attempts.max(1),
        }
    }

    /// Upsert the acting clinician's status. Name and role are always
    /// refreshed from the actor.
    #[instrument(skip(self, actor, request), fields(clinician_id = %actor.id))]
    pub async fn set_status(
        &self,
        actor: &Actor,
        request: SetStatusRequest,
    ) -> Result<ClinicianAvailability, ClinicianError> {
        let update = StatusUpdate {
            clinician_id: actor.id.clone(),
            clinician_name: actor.name.clone(),
            clinician_role: actor.role.clone(),
            status: request.status,
            hospital_id: request.hospital_id,
            department_id: request.department_id,
            last_status_change: Utc::now(),
        };

        let record = self.store.upsert_status(&update).await?;
        info!("Clinician {} is now {}", record.clinician_id, record.status);

        self.audit.record(
            AuditEvent::new("availability.set_status", AuditResource::ClinicianAvailability, &record.clinician_id)
                .by(actor.id.clone()),
        );

        Ok(record)
    }

    pub async fn get(&self, clinician_id: &str) -> Result<ClinicianAvailability, ClinicianError> {
        self.store.find(clinician_id).await?
            .ok_or_else(|| ClinicianError::NotFound(format!("Availability of clinician {}", clinician_id)))
    }

    /// Clinicians currently `available`, optionally scoped. Empty is a valid answer.
    pub async fn list_available(
        &self,
        hospital_id: Option<&str>,
        department_id: Option<&str>,
    ) -> Result<Vec<ClinicianAvailability>, ClinicianError> {
        debug!("Listing available clinicians for hospital {:?} department {:?}", hospital_id, department_id);
        self.store.list_available(hospital_id, department_id).await
    }

    /// Hold `[start, end)` for the appointment. A clinician without a ledger
    /// row is left alone.
    pub async fn block_slot(
        &self,
        clinician_id: &str,
        appointment_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), ClinicianError> {
        for _ in 0..self.max_write_attempts {
            let Some(record) = self.store.find(clinician_id).await? else {
                debug!("No availability record for {}, skipping slot block", clinician_id);
                return Ok(());
            };

            let slots = record.slots_with(appointment_id, start, end);
            if self.store.replace_slots(clinician_id, &slots, record.version).await?.is_some() {
                debug!("Blocked {} - {} for appointment {} on {}", start, end, appointment_id, clinician_id);
                return Ok(());
            }
        }

        Err(ClinicianError::Contention(format!("availability of {}", clinician_id)))
    }

    /// Drop every slot held by the appointment. Missing clinician or entry is a no-op.
    pub async fn release_slot(&self, clinician_id: &str, appointment_id: Uuid) -> Result<(), ClinicianError> {
        for _ in 0..self.max_write_attempts {
            let Some(record) = self.store.find(clinician_id).await? else {
                return Ok(());
            };

            let Some(slots) = record.slots_without(appointment_id) else {
                return Ok(());
            };

            if self.store.replace_slots(clinician_id, &slots, record.version).await?.is_some() {
                debug!("Released slot of appointment {} on {}", appointment_id, clinician_id);
                return Ok(());
            }
        }

        Err(ClinicianError::Contention(format!("availability of {}", clinician_id)))
    }
}
