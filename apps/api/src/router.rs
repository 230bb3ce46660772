use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use appointment_cell::{appointment_routes, reschedule_request_routes, AppointmentState};
use clinician_cell::{clinician_routes, ClinicianState};

pub fn create_router(clinicians: Arc<ClinicianState>, appointments: Arc<AppointmentState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic scheduling API is running!" }))
        .nest("/appointments", appointment_routes(appointments.clone()))
        .nest("/reschedule-requests", reschedule_request_routes(appointments))
        .nest("/clinicians", clinician_routes(clinicians))
}
