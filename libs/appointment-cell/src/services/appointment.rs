// libs/appointment-cell/src/services/appointment.rs
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use audit_cell::{AuditEvent, AuditResource, AuditTrail};
use clinician_cell::services::{AvailabilityService, RoundRobinService};
use shared_config::SchedulingConfig;
use shared_models::auth::Actor;

use crate::models::{
    AcceptAppointmentRequest, Appointment, AppointmentError, AppointmentFilter, AppointmentStatus,
    AppointmentType, Assignment, CancelAppointmentRequest, CompleteAppointmentRequest,
    CreateAppointmentRequest, DashboardStats, EventKind, FindAppointmentsQuery, IntakePlan, Page,
    PageRequest, ReferAppointmentRequest, RequestStatus, RequestType, RescheduleAppointmentRequest,
    RescheduleOutcome, RescheduleRequest, Resolution, ResolveRescheduleRequest, Scenario, Sort,
    SortField, SortOrder,
};
use crate::services::clinical::{ClinicalDispatcher, FollowUp};
use crate::services::lifecycle::Transition;
use crate::services::requests::RescheduleRequestService;
use crate::store::AppointmentStore;

const UPCOMING: [AppointmentStatus; 4] = [
    AppointmentStatus::Scheduled,
    AppointmentStatus::Confirmed,
    AppointmentStatus::PendingAcceptance,
    AppointmentStatus::PendingReschedule,
];

/// The appointment state machine and the orchestration around it.
pub struct AppointmentService {
    store: Arc<dyn AppointmentStore>,
    requests: Arc<RescheduleRequestService>,
    availability: Arc<AvailabilityService>,
    round_robin: Arc<RoundRobinService>,
    dispatcher: ClinicalDispatcher,
    audit: AuditTrail,
    config: SchedulingConfig,
}

impl AppointmentService {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        requests: Arc<RescheduleRequestService>,
        availability: Arc<AvailabilityService>,
        round_robin: Arc<RoundRobinService>,
        dispatcher: ClinicalDispatcher,
        audit: AuditTrail,
        config: SchedulingConfig,
    ) -> Self {
        Self {
            store,
            requests,
            availability,
            round_robin,
            dispatcher,
            audit,
            config,
        }
    }

    // ==========================================================================
    // INTAKE
    // ==========================================================================

    #[instrument(skip(self, actor, request), fields(actor_id = %actor.id))]
    pub async fn create(
        &self,
        actor: &Actor,
        request: CreateAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let id = Uuid::new_v4();
        let result = self.intake(id, actor, request).await;
        self.audit_outcome("appointment.create", AuditResource::Appointment, id, actor, &result);
        result
    }

    async fn intake(
        &self,
        id: Uuid,
        actor: &Actor,
        request: CreateAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let plan = IntakePlan::try_from(&request)?;
        let now = Utc::now();
        let scheduled_date = plan.scheduled_date(now);

        if let Some(patient_id) = request.patient_id.as_deref() {
            self.ensure_patient_free(patient_id, scheduled_date, None).await?;
        }

        let (doctor_id, doctor_name, auto_assigned) = match plan.assignment() {
            Assignment::Preferred { id, name } => (Some(id.clone()), name.clone(), false),
            Assignment::Explicit { doctor_id, doctor_name } => (doctor_id.clone(), doctor_name.clone(), false),
            Assignment::RoundRobin => {
                let next = self.round_robin
                    .get_next_clinician(&request.hospital_id, request.department_id.as_deref())
                    .await?;
                match next {
                    Some(clinician) => (Some(clinician.id), Some(clinician.name), true),
                    None => {
                        debug!("No clinician from rotation; appointment {} will be queued", id);
                        (None, None, false)
                    },
                }
            },
        };

        let duration_minutes = request.duration_minutes.unwrap_or(self.config.default_duration_minutes);
        let mut appointment = Appointment {
            id,
            patient_id: request.patient_id,
            patient_chi: request.patient_chi,
            patient_name: request.patient_name,
            status: plan.initial_status(doctor_id.is_some()),
            doctor_id,
            doctor_name,
            hospital_id: request.hospital_id,
            department_id: request.department_id,
            scenario: plan.scenario(),
            appointment_type: request.appointment_type.unwrap_or_else(|| plan.default_type()),
            scheduled_date,
            end_time: Some(scheduled_date + Duration::minutes(duration_minutes as i64)),
            duration_minutes,
            priority: plan.priority(request.priority),
            reason: request.reason,
            notes: request.notes,
            history: Vec::new(),
            auto_assigned,
            is_emergency_unknown: request.is_emergency_unknown,
            emergency_alias: request.emergency_alias,
            emergency_conditions: request.emergency_conditions,
            preferred_clinician_id: request.preferred_clinician_id,
            preferred_clinician_name: request.preferred_clinician_name,
            accepted_by_id: None,
            accepted_at: None,
            referred_by_id: None,
            created_by: Some(actor.id.clone()),
            version: 0,
            created_at: now,
            updated_at: now,
        };

        appointment.record(EventKind::Created, Some(&actor.id), Some(format!("{} intake", appointment.scenario)));
        if auto_assigned {
            let text = format!(
                "Assigned to {} by rotation",
                appointment.doctor_name.as_deref().unwrap_or_default()
            );
            appointment.record(EventKind::AutoAssigned, None, Some(text));
        }

        let saved = self.store.insert(&appointment).await?;
        info!(
            "Created {} appointment {} with status {}",
            saved.scenario, saved.id, saved.status
        );
        Ok(saved)
    }

    // ==========================================================================
    // READS
    // ==========================================================================

    pub async fn get(&self, id: Uuid) -> Result<Appointment, AppointmentError> {
        self.store.get(id).await?.ok_or(AppointmentError::NotFound(id))
    }

    pub async fn find_all(&self, query: FindAppointmentsQuery) -> Result<Page<Appointment>, AppointmentError> {
        let limit = query.limit
            .unwrap_or(self.config.default_page_size)
            .clamp(1, self.config.max_page_size.max(1));
        let page = query.page.unwrap_or(1).max(1);

        let filter = AppointmentFilter {
            doctor_id: query.doctor_id,
            patient_id: query.patient_id,
            hospital_id: query.hospital_id,
            statuses: query.status.into_iter().collect(),
            appointment_type: query.appointment_type,
            scenario: query.scenario,
            date_from: query.date_from,
            date_to: query.date_to,
        };
        let sort = Sort {
            field: SortField::parse(query.sort_by.as_deref()),
            order: SortOrder::parse(query.sort_order.as_deref()),
        };

        let data = self.store.search(&filter, sort, PageRequest { page, limit }).await?;
        let total = self.store.count(&filter).await?;

        Ok(Page { data, total, page, limit })
    }

    /// Appointments waiting for a clinician: urgent first, oldest first within a priority.
    pub async fn get_queue(&self, hospital_id: Option<&str>) -> Result<Vec<Appointment>, AppointmentError> {
        let mut queue = self.store.pending_queue(hospital_id).await?;
        // Stable, so creation order survives within a priority
        queue.sort_by_key(|a| a.priority.rank());
        Ok(queue)
    }

    pub async fn dashboard(
        &self,
        actor: &Actor,
        hospital_id: Option<String>,
    ) -> Result<DashboardStats, AppointmentError> {
        let now = Utc::now();
        let day_start = Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN));
        let day_end = day_start + Duration::days(1);

        let today = |scope: AppointmentFilter| AppointmentFilter {
            date_from: Some(day_start),
            date_to: Some(day_end),
            ..scope
        };
        let upcoming = |scope: AppointmentFilter| AppointmentFilter {
            date_from: Some(now),
            statuses: UPCOMING.to_vec(),
            ..scope
        };
        let with_status = |scope: AppointmentFilter, status: AppointmentStatus| AppointmentFilter {
            statuses: vec![status],
            ..scope
        };

        if self.config.is_clinician_role(actor.role()) {
            let own = AppointmentFilter {
                doctor_id: Some(actor.id.clone()),
                ..Default::default()
            };
            return Ok(DashboardStats::Clinician {
                today: self.store.count(&today(own.clone())).await?,
                upcoming: self.store.count(&upcoming(own.clone())).await?,
                completed: self.store.count(&with_status(own, AppointmentStatus::Completed)).await?,
                pending_acceptance: self.store
                    .count(&with_status(AppointmentFilter::default(), AppointmentStatus::PendingAcceptance))
                    .await?,
            });
        }

        let hospital = AppointmentFilter {
            hospital_id,
            ..Default::default()
        };
        Ok(DashboardStats::Hospital {
            today: self.store.count(&today(hospital.clone())).await?,
            upcoming: self.store.count(&upcoming(hospital.clone())).await?,
            cancelled_today: self.store
                .count(&today(with_status(hospital.clone(), AppointmentStatus::Cancelled)))
                .await?,
            pending_acceptance: self.store
                .count(&with_status(hospital.clone(), AppointmentStatus::PendingAcceptance))
                .await?,
            pending_reschedule: self.store
                .count(&with_status(hospital, AppointmentStatus::PendingReschedule))
                .await?,
        })
    }

    // ==========================================================================
    // TRANSITIONS
    // ==========================================================================

    /// Claim a queued appointment for the acting clinician.
    #[instrument(skip(self, actor, request), fields(actor_id = %actor.id))]
    pub async fn accept(
        &self,
        id: Uuid,
        actor: &Actor,
        request: AcceptAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let result = self.apply(id, Transition::Accept, |a| {
            a.doctor_id = Some(actor.id.clone());
            a.doctor_name = Some(actor.name.clone());
            a.accepted_by_id = Some(actor.id.clone());
            a.accepted_at = Some(Utc::now());
            a.record(EventKind::Accepted, Some(&actor.id), request.notes.clone());
        }).await;
        self.audit_outcome("appointment.accept", AuditResource::Appointment, id, actor, &result);
        let appointment = result?;

        self.block_slot(&actor.id, &appointment).await;

        let unscheduled = matches!(appointment.scenario, Scenario::Emergency | Scenario::WalkIn);
        if unscheduled && appointment.has_known_patient() {
            self.dispatcher.dispatch(&appointment, vec![FollowUp::OpenEncounter { discharge: true }]);
        }
        Ok(appointment)
    }

    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn attend(&self, id: Uuid, actor: &Actor) -> Result<Appointment, AppointmentError> {
        let result = self.apply(id, Transition::Attend, |a| {
            a.record(EventKind::Attended, Some(&actor.id), None);
        }).await;
        self.audit_outcome("appointment.attend", AuditResource::Appointment, id, actor, &result);
        let appointment = result?;

        if appointment.has_known_patient() {
            self.dispatcher.dispatch(&appointment, vec![FollowUp::OpenEncounter { discharge: true }]);
        }
        Ok(appointment)
    }

    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn check_in(&self, id: Uuid, actor: &Actor) -> Result<Appointment, AppointmentError> {
        let result = self.apply(id, Transition::CheckIn, |a| {
            a.record(EventKind::CheckedIn, Some(&actor.id), None);
        }).await;
        self.audit_outcome("appointment.check_in", AuditResource::Appointment, id, actor, &result);
        result
    }

    #[instrument(skip(self, actor, request), fields(actor_id = %actor.id))]
    pub async fn complete(
        &self,
        id: Uuid,
        actor: &Actor,
        request: CompleteAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let result = self.apply(id, Transition::Complete, |a| {
            a.record(EventKind::Completed, Some(&actor.id), request.notes.clone());
        }).await;
        self.audit_outcome("appointment.complete", AuditResource::Appointment, id, actor, &result);
        let appointment = result?;

        self.release_slot(&appointment).await;

        if request.create_encounter && appointment.has_known_patient() {
            self.dispatcher.dispatch(&appointment, vec![FollowUp::OpenEncounter { discharge: false }]);
        }
        Ok(appointment)
    }

    #[instrument(skip(self, actor, request), fields(actor_id = %actor.id))]
    pub async fn cancel(
        &self,
        id: Uuid,
        actor: &Actor,
        request: CancelAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let result = self.apply(id, Transition::Cancel, |a| {
            a.record(EventKind::Cancelled, Some(&actor.id), request.reason.clone());
        }).await;
        self.audit_outcome("appointment.cancel", AuditResource::Appointment, id, actor, &result);
        let appointment = result?;

        self.release_slot(&appointment).await;
        Ok(appointment)
    }

    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn mark_no_show(&self, id: Uuid, actor: &Actor) -> Result<Appointment, AppointmentError> {
        let result = self.apply(id, Transition::MarkNoShow, |a| {
            a.record(EventKind::NoShow, Some(&actor.id), None);
        }).await;
        self.audit_outcome("appointment.no_show", AuditResource::Appointment, id, actor, &result);
        let appointment = result?;

        self.release_slot(&appointment).await;
        Ok(appointment)
    }

    /// Retire the appointment and book a replacement at `new_date`.
    #[instrument(skip(self, actor, request), fields(actor_id = %actor.id))]
    pub async fn reschedule(
        &self,
        id: Uuid,
        actor: &Actor,
        request: RescheduleAppointmentRequest,
    ) -> Result<RescheduleOutcome, AppointmentError> {
        let result = self.move_to(id, actor, request).await;
        self.audit_outcome("appointment.reschedule", AuditResource::Appointment, id, actor, &result);
        result
    }

    async fn move_to(
        &self,
        id: Uuid,
        actor: &Actor,
        request: RescheduleAppointmentRequest,
    ) -> Result<RescheduleOutcome, AppointmentError> {
        let current = self.get(id).await?;
        if let Some(patient_id) = current.patient_id.as_deref() {
            self.ensure_patient_free(patient_id, request.new_date, Some(id)).await?;
        }

        let replacement_id = Uuid::new_v4();
        let (before, original) = self.apply_with_previous(id, Transition::Reschedule, |a| {
            let text = format!("Moved to {} as appointment {}", request.new_date.to_rfc3339(), replacement_id);
            a.record(EventKind::RescheduledTo, Some(&actor.id), Some(text));
        }).await?;

        let now = Utc::now();
        let mut replacement = Appointment {
            id: replacement_id,
            status: if original.doctor_id.is_some() {
                AppointmentStatus::Scheduled
            } else {
                AppointmentStatus::PendingAcceptance
            },
            scheduled_date: request.new_date,
            end_time: Some(request.new_date + Duration::minutes(original.duration_minutes as i64)),
            notes: None,
            history: Vec::new(),
            accepted_by_id: None,
            accepted_at: None,
            referred_by_id: None,
            created_by: Some(actor.id.clone()),
            version: 0,
            created_at: now,
            updated_at: now,
            ..original.clone()
        };
        replacement.record(EventKind::Created, Some(&actor.id), Some(format!("{} intake", replacement.scenario)));
        let text = match &request.reason {
            Some(reason) => format!("Rescheduled from appointment {}: {}", id, reason),
            None => format!("Rescheduled from appointment {}", id),
        };
        replacement.record(EventKind::RescheduledFrom, Some(&actor.id), Some(text));

        let replacement = match self.store.insert(&replacement).await {
            Ok(saved) => saved,
            Err(e) => {
                self.roll_back(&before, &original).await;
                return Err(e);
            },
        };
        info!("Appointment {} rescheduled as {}", id, replacement.id);

        self.release_slot(&original).await;

        Ok(RescheduleOutcome { original, replacement })
    }

    /// Book a referral with another clinician. The original is left as is.
    #[instrument(skip(self, actor, request), fields(actor_id = %actor.id))]
    pub async fn refer(
        &self,
        id: Uuid,
        actor: &Actor,
        request: ReferAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let result = self.book_referral(id, actor, request).await;
        self.audit_outcome("appointment.refer", AuditResource::Appointment, id, actor, &result);
        result
    }

    async fn book_referral(
        &self,
        id: Uuid,
        actor: &Actor,
        request: ReferAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        if request.new_doctor_id.trim().is_empty() {
            return Err(AppointmentError::Validation("new_doctor_id is required".to_string()));
        }

        let original = self.get(id).await?;
        let now = Utc::now();
        let mut referral = Appointment {
            id: Uuid::new_v4(),
            doctor_id: Some(request.new_doctor_id),
            doctor_name: request.new_doctor_name,
            appointment_type: AppointmentType::Referral,
            scheduled_date: now,
            end_time: Some(now + Duration::minutes(original.duration_minutes as i64)),
            status: AppointmentStatus::Scheduled,
            reason: request.reason.or_else(|| original.reason.clone()),
            notes: None,
            history: Vec::new(),
            auto_assigned: false,
            accepted_by_id: None,
            accepted_at: None,
            referred_by_id: original.doctor_id.clone(),
            created_by: Some(actor.id.clone()),
            version: 0,
            created_at: now,
            updated_at: now,
            ..original.clone()
        };
        referral.record(EventKind::Created, Some(&actor.id), Some("referral".to_string()));
        let text = format!(
            "Referred from appointment {} by {}",
            original.id,
            original.doctor_id.as_deref().unwrap_or("unassigned clinician")
        );
        referral.record(EventKind::Referred, Some(&actor.id), Some(text));

        let saved = self.store.insert(&referral).await?;
        info!("Appointment {} referred as {}", id, saved.id);
        Ok(saved)
    }

    // ==========================================================================
    // REQUEST WORKFLOW
    // ==========================================================================

    /// Park the appointment in `pending_reschedule` and open a request for an admin.
    #[instrument(skip(self, actor, reason), fields(actor_id = %actor.id))]
    pub async fn request_reschedule(
        &self,
        id: Uuid,
        actor: &Actor,
        reason: String,
    ) -> Result<RescheduleRequest, AppointmentError> {
        let result = self.open_request(id, actor, reason, RequestType::Reschedule).await;
        self.audit_outcome("appointment.request_reschedule", AuditResource::Appointment, id, actor, &result);
        result
    }

    /// Open a cancellation request; the appointment is only cancelled on approval.
    #[instrument(skip(self, actor, reason), fields(actor_id = %actor.id))]
    pub async fn request_cancel(
        &self,
        id: Uuid,
        actor: &Actor,
        reason: String,
    ) -> Result<RescheduleRequest, AppointmentError> {
        let result = self.open_request(id, actor, reason, RequestType::Cancel).await;
        self.audit_outcome("appointment.request_cancel", AuditResource::Appointment, id, actor, &result);
        result
    }

    async fn open_request(
        &self,
        id: Uuid,
        actor: &Actor,
        reason: String,
        request_type: RequestType,
    ) -> Result<RescheduleRequest, AppointmentError> {
        if reason.trim().is_empty() {
            return Err(AppointmentError::Validation("reason is required".to_string()));
        }

        let (transition, kind) = match request_type {
            RequestType::Reschedule => (Transition::RequestReschedule, EventKind::RescheduleRequested),
            RequestType::Cancel => (Transition::RequestCancel, EventKind::CancelRequested),
        };

        // Parking a closed appointment makes it live again, so its slot must still be free
        let mut reopening = false;
        if request_type == RequestType::Reschedule {
            self.ensure_no_pending_reschedule(id).await?;
            let current = self.get(id).await?;
            if !current.status.is_live() {
                reopening = true;
                if let Some(patient_id) = current.patient_id.as_deref() {
                    self.ensure_patient_free(patient_id, current.scheduled_date, Some(id)).await?;
                }
            }
        }

        let (previous, parked) = self.apply_guarded(
            id,
            transition,
            |a| {
                if request_type == RequestType::Reschedule && !a.status.is_live() && !reopening {
                    return Err(AppointmentError::Conflict(format!(
                        "Appointment {} was closed while the request was being opened",
                        id
                    )));
                }
                Ok(())
            },
            |a| a.record(kind, Some(&actor.id), Some(reason.clone())),
        ).await?;

        let previous_status = match request_type {
            RequestType::Reschedule => Some(previous.status),
            RequestType::Cancel => None,
        };
        match self.requests.create(id, &reason, actor, request_type, previous_status).await {
            Ok(request) => Ok(request),
            Err(e) => {
                self.roll_back(&previous, &parked).await;
                Err(e)
            },
        }
    }

    async fn ensure_no_pending_reschedule(&self, id: Uuid) -> Result<(), AppointmentError> {
        let open = self.requests.for_appointment(id).await?;
        match open.iter().find(|r| r.request_type == RequestType::Reschedule && r.status == RequestStatus::Pending) {
            Some(pending) => Err(AppointmentError::Conflict(format!(
                "Appointment {} already has pending reschedule request {}",
                id, pending.id
            ))),
            None => Ok(()),
        }
    }

    /// Admin sign-off on a pending request.
    ///
    /// An approved cancel cancels the appointment. An approved reschedule only
    /// records `new_date`; moving the appointment is a separate `reschedule`
    /// call. A rejected reschedule returns the appointment to its prior status.
    #[instrument(skip(self, actor, resolution), fields(actor_id = %actor.id))]
    pub async fn resolve_request(
        &self,
        request_id: Uuid,
        actor: &Actor,
        resolution: ResolveRescheduleRequest,
    ) -> Result<RescheduleRequest, AppointmentError> {
        let result = self.settle_request(request_id, actor, resolution).await;
        self.audit_outcome("reschedule_request.resolve", AuditResource::RescheduleRequest, request_id, actor, &result);
        result
    }

    async fn settle_request(
        &self,
        request_id: Uuid,
        actor: &Actor,
        resolution: ResolveRescheduleRequest,
    ) -> Result<RescheduleRequest, AppointmentError> {
        if !self.config.is_admin_role(actor.role()) {
            return Err(AppointmentError::Forbidden(
                "Only administrators can resolve reschedule requests".to_string(),
            ));
        }

        let pending = self.requests.get(request_id).await?;
        let approving_reschedule = resolution.resolution == Resolution::Approved
            && pending.request_type == RequestType::Reschedule;
        if approving_reschedule && resolution.new_date.is_none() {
            return Err(AppointmentError::Validation(
                "new_date is required to approve a reschedule".to_string(),
            ));
        }

        let resolved = self.requests.mark_resolved(
            request_id,
            resolution.resolution,
            resolution.new_date,
            resolution.notes,
            actor,
        ).await?;

        match (resolution.resolution, resolved.request_type) {
            (Resolution::Approved, RequestType::Cancel) => {
                let cancel = CancelAppointmentRequest { reason: Some(resolved.reason.clone()) };
                match self.cancel(resolved.appointment_id, actor, cancel).await {
                    Ok(_) => {},
                    Err(AppointmentError::Conflict(msg)) => {
                        warn!("Approved cancel request {}: {}", resolved.id, msg);
                    },
                    Err(e) => {
                        self.requests.reopen(&resolved).await;
                        return Err(e);
                    },
                }
            },
            (Resolution::Approved, RequestType::Reschedule) => {
                info!(
                    "Reschedule request {} approved for {:?}; appointment {} awaits a reschedule call",
                    resolved.id, resolved.new_date, resolved.appointment_id
                );
            },
            (Resolution::Rejected, RequestType::Reschedule) => {
                self.restore_after_request(&resolved, actor).await?;
            },
            (Resolution::Rejected, RequestType::Cancel) => {},
        }

        Ok(resolved)
    }

    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn withdraw_request(
        &self,
        request_id: Uuid,
        actor: &Actor,
    ) -> Result<RescheduleRequest, AppointmentError> {
        let result = async {
            let withdrawn = self.requests.withdraw(request_id, actor).await?;
            self.restore_after_request(&withdrawn, actor).await?;
            Ok::<_, AppointmentError>(withdrawn)
        }.await;
        self.audit_outcome("reschedule_request.withdraw", AuditResource::RescheduleRequest, request_id, actor, &result);
        result
    }

    /// Undo the `pending_reschedule` parking of a reschedule request that did not go through.
    async fn restore_after_request(&self, request: &RescheduleRequest, actor: &Actor) -> Result<(), AppointmentError> {
        let Some(previous) = request.previous_status else {
            return Ok(());
        };
        if request.request_type != RequestType::Reschedule || previous == AppointmentStatus::PendingReschedule {
            return Ok(());
        }

        if self.ensure_no_pending_reschedule(request.appointment_id).await.is_err() {
            debug!("Appointment {} has another pending reschedule request; staying parked", request.appointment_id);
            return Ok(());
        }

        let text = format!("Reschedule request {} {}; back to {}", request.id, request.status, previous);
        let restored = self.update(request.appointment_id, |a| {
            if a.status != AppointmentStatus::PendingReschedule {
                return Ok(false);
            }
            a.status = previous;
            a.record(EventKind::Note, Some(&actor.id), Some(text.clone()));
            Ok(true)
        }).await?;

        if restored.is_some() {
            debug!("Appointment {} returned to {}", request.appointment_id, previous);
        }
        Ok(())
    }

    // ==========================================================================
    // HELPERS
    // ==========================================================================

    async fn apply<F>(&self, id: Uuid, transition: Transition, mutate: F) -> Result<Appointment, AppointmentError>
    where
        F: Fn(&mut Appointment),
    {
        self.apply_with_previous(id, transition, mutate).await.map(|(_, saved)| saved)
    }

    /// Validate and commit one transition; returns the row before and after.
    async fn apply_with_previous<F>(
        &self,
        id: Uuid,
        transition: Transition,
        mutate: F,
    ) -> Result<(Appointment, Appointment), AppointmentError>
    where
        F: Fn(&mut Appointment),
    {
        self.apply_guarded(id, transition, |_| Ok(()), mutate).await
    }

    /// Like `apply_with_previous`, with an extra check against the freshest row
    /// before the transition's own precondition.
    async fn apply_guarded<G, F>(
        &self,
        id: Uuid,
        transition: Transition,
        guard: G,
        mutate: F,
    ) -> Result<(Appointment, Appointment), AppointmentError>
    where
        G: Fn(&Appointment) -> Result<(), AppointmentError>,
        F: Fn(&mut Appointment),
    {
        let committed = self.update(id, |a| {
            guard(a)?;
            transition.validate(a.status)?;
            if let Some(target) = transition.target() {
                a.status = target;
            }
            mutate(a);
            Ok(true)
        }).await?;

        committed.ok_or_else(|| AppointmentError::Database(format!("Transition on {} was skipped", id)))
    }

    /// Undo a committed transition whose follow-up write failed. Skipped when
    /// the row has moved on since.
    async fn roll_back(&self, before: &Appointment, after: &Appointment) {
        let undone = self.update(after.id, |a| {
            if a.version != after.version {
                return Ok(false);
            }
            a.status = before.status;
            a.history = before.history.clone();
            Ok(true)
        }).await;

        match undone {
            Ok(Some(_)) => info!("Appointment {} rolled back to {}", after.id, before.status),
            Ok(None) => warn!("Appointment {} changed before it could be rolled back", after.id),
            Err(e) => warn!("Could not roll back appointment {}: {}", after.id, e),
        }
    }

    /// Conditional read-modify-write on one appointment. `change` runs against
    /// the freshest row on every attempt; returning `false` abandons the write.
    async fn update<F>(&self, id: Uuid, change: F) -> Result<Option<(Appointment, Appointment)>, AppointmentError>
    where
        F: Fn(&mut Appointment) -> Result<bool, AppointmentError>,
    {
        for attempt in 1..=self.config.max_write_attempts.max(1) {
            let current = self.get(id).await?;
            let mut next = current.clone();
            if !change(&mut next)? {
                return Ok(None);
            }
            next.updated_at = Utc::now();

            if let Some(saved) = self.store.compare_and_swap(&next, current.version).await? {
                info!("Appointment {}: {} -> {}", id, current.status, saved.status);
                return Ok(Some((current, saved)));
            }
            debug!("Appointment {} changed underneath us (attempt {})", id, attempt);
        }

        Err(AppointmentError::Contention(format!("appointment {}", id)))
    }

    async fn ensure_patient_free(
        &self,
        patient_id: &str,
        scheduled_date: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<(), AppointmentError> {
        match self.store.find_live_at(patient_id, scheduled_date).await? {
            Some(existing) if Some(existing.id) != exclude => Err(AppointmentError::Conflict(format!(
                "Patient {} already has appointment {} ({}) at {}",
                patient_id, existing.id, existing.status, scheduled_date.to_rfc3339()
            ))),
            _ => Ok(()),
        }
    }

    async fn block_slot(&self, clinician_id: &str, appointment: &Appointment) {
        if let Err(e) = self.availability
            .block_slot(clinician_id, appointment.id, appointment.scheduled_date, appointment.scheduled_end())
            .await
        {
            warn!("Could not block slot for appointment {} on {}: {}", appointment.id, clinician_id, e);
        }
    }

    async fn release_slot(&self, appointment: &Appointment) {
        let Some(doctor_id) = appointment.doctor_id.as_deref() else {
            return;
        };
        if let Err(e) = self.availability.release_slot(doctor_id, appointment.id).await {
            warn!("Could not release slot for appointment {} on {}: {}", appointment.id, doctor_id, e);
        }
    }

    fn audit_outcome<T>(
        &self,
        action: &str,
        resource: AuditResource,
        resource_id: Uuid,
        actor: &Actor,
        result: &Result<T, AppointmentError>,
    ) {
        let event = AuditEvent::new(action, resource, resource_id).by(actor.id.clone());
        self.audit.record(match result {
            Ok(_) => event,
            Err(e) => event.failed(e.to_string()),
        });
    }
}
