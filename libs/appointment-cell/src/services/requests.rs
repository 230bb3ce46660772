use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::SchedulingConfig;
use shared_models::auth::Actor;

use crate::models::{
    AppointmentError, AppointmentStatus, RequestStatus, RequestType, RescheduleRequest, Resolution,
};
use crate::store::RescheduleRequestStore;

/// Storage-level half of the reschedule/cancel approval workflow. The
/// appointment side effects of creating and resolving requests live in
/// `AppointmentService`.
pub struct RescheduleRequestService {
    store: Arc<dyn RescheduleRequestStore>,
    max_write_attempts: u32,
}

impl RescheduleRequestService {
    pub fn new(store: Arc<dyn RescheduleRequestStore>, config: &SchedulingConfig) -> Self {
        Self {
            store,
            max_write_attempts: config.max_write_attempts.max(1),
        }
    }

    pub async fn create(
        &self,
        appointment_id: Uuid,
        reason: &str,
        actor: &Actor,
        request_type: RequestType,
        previous_status: Option<AppointmentStatus>,
    ) -> Result<RescheduleRequest, AppointmentError> {
        let now = Utc::now();
        let request = RescheduleRequest {
            id: Uuid::new_v4(),
            appointment_id,
            requested_by_id: actor.id.clone(),
            requested_by_name: actor.name.clone(),
            requested_by_role: actor.role.clone(),
            reason: reason.to_string(),
            request_type,
            status: RequestStatus::Pending,
            previous_status,
            resolved_by_id: None,
            resolved_at: None,
            new_date: None,
            resolution_notes: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let saved = self.store.insert(&request).await?;
        info!("Request {} ({:?}) opened on appointment {}", saved.id, request_type, appointment_id);
        Ok(saved)
    }

    pub async fn get(&self, id: Uuid) -> Result<RescheduleRequest, AppointmentError> {
        self.store.get(id).await?.ok_or(AppointmentError::RequestNotFound(id))
    }

    /// The review queue, oldest first.
    pub async fn find_pending(&self) -> Result<Vec<RescheduleRequest>, AppointmentError> {
        debug!("Loading pending reschedule requests");
        self.store.pending().await
    }

    pub async fn for_appointment(&self, appointment_id: Uuid) -> Result<Vec<RescheduleRequest>, AppointmentError> {
        self.store.for_appointment(appointment_id).await
    }

    /// Move a pending request to approved or rejected. Exactly one caller wins.
    #[instrument(skip(self, actor, notes), fields(actor_id = %actor.id))]
    pub async fn mark_resolved(
        &self,
        id: Uuid,
        resolution: Resolution,
        new_date: Option<DateTime<Utc>>,
        notes: Option<String>,
        actor: &Actor,
    ) -> Result<RescheduleRequest, AppointmentError> {
        self.settle(id, |request| {
            request.status = resolution.into();
            request.resolved_by_id = Some(actor.id.clone());
            request.resolved_at = Some(Utc::now());
            request.new_date = new_date;
            request.resolution_notes = notes.clone();
            Ok(())
        }).await
    }

    /// The requester takes their own pending request back.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn withdraw(&self, id: Uuid, actor: &Actor) -> Result<RescheduleRequest, AppointmentError> {
        self.settle(id, |request| {
            if request.requested_by_id != actor.id {
                return Err(AppointmentError::Forbidden(
                    "Only the requester can withdraw a request".to_string(),
                ));
            }
            request.status = RequestStatus::Cancelled;
            request.resolved_by_id = Some(actor.id.clone());
            request.resolved_at = Some(Utc::now());
            Ok(())
        }).await
    }

    /// Put a resolved request back in the review queue after its follow-through
    /// failed. Only applies if the row is still the one that was resolved.
    pub async fn reopen(&self, resolved: &RescheduleRequest) {
        let mut request = resolved.clone();
        request.status = RequestStatus::Pending;
        request.resolved_by_id = None;
        request.resolved_at = None;
        request.new_date = None;
        request.resolution_notes = None;
        request.updated_at = Utc::now();

        match self.store.compare_and_swap(&request, resolved.version).await {
            Ok(Some(_)) => info!("Request {} reopened", resolved.id),
            Ok(None) => warn!("Request {} changed before it could be reopened", resolved.id),
            Err(e) => warn!("Could not reopen request {}: {}", resolved.id, e),
        }
    }

    async fn settle<F>(&self, id: Uuid, apply: F) -> Result<RescheduleRequest, AppointmentError>
    where
        F: Fn(&mut RescheduleRequest) -> Result<(), AppointmentError>,
    {
        for _ in 0..self.max_write_attempts {
            let mut request = self.get(id).await?;
            if request.status != RequestStatus::Pending {
                return Err(AppointmentError::Conflict(format!("Request is already {}", request.status)));
            }

            let expected_version = request.version;
            apply(&mut request)?;
            request.updated_at = Utc::now();

            if let Some(saved) = self.store.compare_and_swap(&request, expected_version).await? {
                info!("Request {} is now {}", saved.id, saved.status);
                return Ok(saved);
            }
        }

        Err(AppointmentError::Contention(format!("reschedule request {}", id)))
    }
}
