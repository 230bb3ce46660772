// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
    middleware,
};

use audit_cell::AuditTrail;
use clinician_cell::ClinicianState;
use shared_config::{AppConfig, SchedulingConfig};
use shared_database::SupabaseClient;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::{AppointmentService, ClinicalDispatcher, RescheduleRequestService};
use crate::store::{
    AppointmentStore, InMemoryAppointmentStore, InMemoryRescheduleRequestStore,
    RescheduleRequestStore, SupabaseAppointmentStore, SupabaseRescheduleRequestStore,
};

pub struct AppointmentState {
    pub config: Arc<AppConfig>,
    pub scheduling: SchedulingConfig,
    pub appointments: Arc<AppointmentService>,
    pub requests: Arc<RescheduleRequestService>,
}

impl AppointmentState {
    /// Wires the state machine onto the clinician cell's ledger and assignor.
    pub fn from_config(config: Arc<AppConfig>, clinicians: &ClinicianState, audit: AuditTrail) -> Self {
        let (appointments, requests): (Arc<dyn AppointmentStore>, Arc<dyn RescheduleRequestStore>) =
            if config.is_configured() {
                let supabase = Arc::new(SupabaseClient::new(&config));
                (
                    Arc::new(SupabaseAppointmentStore::new(Arc::clone(&supabase))),
                    Arc::new(SupabaseRescheduleRequestStore::new(supabase)),
                )
            } else {
                (Arc::new(InMemoryAppointmentStore::new()), Arc::new(InMemoryRescheduleRequestStore::new()))
            };

        let dispatcher = ClinicalDispatcher::from_config(&config);
        Self::with_stores(config, appointments, requests, clinicians, dispatcher, audit)
    }

    pub fn with_stores(
        config: Arc<AppConfig>,
        appointments: Arc<dyn AppointmentStore>,
        requests: Arc<dyn RescheduleRequestStore>,
        clinicians: &ClinicianState,
        dispatcher: ClinicalDispatcher,
        audit: AuditTrail,
    ) -> Self {
        let scheduling = clinicians.scheduling.clone();
        let requests = Arc::new(RescheduleRequestService::new(requests, &scheduling));
        let service = AppointmentService::new(
            appointments,
            Arc::clone(&requests),
            Arc::clone(&clinicians.availability),
            Arc::clone(&clinicians.round_robin),
            dispatcher,
            audit,
            scheduling.clone(),
        );

        Self {
            config,
            scheduling,
            appointments: Arc::new(service),
            requests,
        }
    }
}

pub fn appointment_routes(state: Arc<AppointmentState>) -> Router {
    Router::new()
        .route("/", post(handlers::create_appointment).get(handlers::find_appointments))
        .route("/queue", get(handlers::get_queue))
        .route("/dashboard", get(handlers::get_dashboard))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/accept", post(handlers::accept_appointment))
        .route("/{appointment_id}/attend", post(handlers::attend_appointment))
        .route("/{appointment_id}/check-in", post(handlers::check_in_appointment))
        .route("/{appointment_id}/complete", post(handlers::complete_appointment))
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/{appointment_id}/reschedule", post(handlers::reschedule_appointment))
        .route("/{appointment_id}/no-show", post(handlers::mark_no_show))
        .route("/{appointment_id}/refer", post(handlers::refer_appointment))
        .route("/{appointment_id}/request-reschedule", post(handlers::request_reschedule))
        .route("/{appointment_id}/request-cancel", post(handlers::request_cancel))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware))
        .with_state(state)
}

pub fn reschedule_request_routes(state: Arc<AppointmentState>) -> Router {
    Router::new()
        .route("/pending", get(handlers::list_pending_requests))
        .route("/appointment/{appointment_id}", get(handlers::list_requests_for_appointment))
        .route("/{request_id}", get(handlers::get_request))
        .route("/{request_id}/resolve", post(handlers::resolve_request))
        .route("/{request_id}/withdraw", post(handlers::withdraw_request))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware))
        .with_state(state)
}
