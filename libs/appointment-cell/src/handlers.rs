// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::Actor;
use shared_models::error::AppError;

use crate::models::{
    AcceptAppointmentRequest, CancelAppointmentRequest, ChangeRequestBody,
    CompleteAppointmentRequest, CreateAppointmentRequest, FindAppointmentsQuery,
    ReferAppointmentRequest, RescheduleAppointmentRequest, ResolveRescheduleRequest,
};
use crate::router::AppointmentState;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct HospitalQuery {
    pub hospital_id: Option<String>,
}

// ==============================================================================
// APPOINTMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_appointment(
    State(state): State<Arc<AppointmentState>>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let appointment = state.appointments.create(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(json!(appointment))))
}

#[axum::debug_handler]
pub async fn find_appointments(
    State(state): State<Arc<AppointmentState>>,
    Query(query): Query<FindAppointmentsQuery>,
) -> Result<Json<Value>, AppError> {
    let page = state.appointments.find_all(query).await?;
    Ok(Json(json!(page)))
}

#[axum::debug_handler]
pub async fn get_queue(
    State(state): State<Arc<AppointmentState>>,
    Query(query): Query<HospitalQuery>,
) -> Result<Json<Value>, AppError> {
    let queue = state.appointments.get_queue(query.hospital_id.as_deref()).await?;

    Ok(Json(json!({
        "appointments": queue,
        "total": queue.len()
    })))
}

#[axum::debug_handler]
pub async fn get_dashboard(
    State(state): State<Arc<AppointmentState>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<HospitalQuery>,
) -> Result<Json<Value>, AppError> {
    let stats = state.appointments.dashboard(&actor, query.hospital_id).await?;
    Ok(Json(json!(stats)))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppointmentState>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.appointments.get(appointment_id).await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn accept_appointment(
    State(state): State<Arc<AppointmentState>>,
    Extension(actor): Extension<Actor>,
    Path(appointment_id): Path<Uuid>,
    body: Option<Json<AcceptAppointmentRequest>>,
) -> Result<Json<Value>, AppError> {
    if !state.scheduling.is_clinician_role(actor.role()) {
        return Err(AppError::Forbidden("Only clinicians can accept appointments".to_string()));
    }

    let request = body.map(|Json(b)| b).unwrap_or_default();
    let appointment = state.appointments.accept(appointment_id, &actor, request).await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn attend_appointment(
    State(state): State<Arc<AppointmentState>>,
    Extension(actor): Extension<Actor>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.appointments.attend(appointment_id, &actor).await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn check_in_appointment(
    State(state): State<Arc<AppointmentState>>,
    Extension(actor): Extension<Actor>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.appointments.check_in(appointment_id, &actor).await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn complete_appointment(
    State(state): State<Arc<AppointmentState>>,
    Extension(actor): Extension<Actor>,
    Path(appointment_id): Path<Uuid>,
    body: Option<Json<CompleteAppointmentRequest>>,
) -> Result<Json<Value>, AppError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let appointment = state.appointments.complete(appointment_id, &actor, request).await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppointmentState>>,
    Extension(actor): Extension<Actor>,
    Path(appointment_id): Path<Uuid>,
    body: Option<Json<CancelAppointmentRequest>>,
) -> Result<Json<Value>, AppError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let appointment = state.appointments.cancel(appointment_id, &actor, request).await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn mark_no_show(
    State(state): State<Arc<AppointmentState>>,
    Extension(actor): Extension<Actor>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.appointments.mark_no_show(appointment_id, &actor).await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(state): State<Arc<AppointmentState>>,
    Extension(actor): Extension<Actor>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let outcome = state.appointments.reschedule(appointment_id, &actor, request).await?;
    Ok(Json(json!(outcome)))
}

#[axum::debug_handler]
pub async fn refer_appointment(
    State(state): State<Arc<AppointmentState>>,
    Extension(actor): Extension<Actor>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<ReferAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let referral = state.appointments.refer(appointment_id, &actor, request).await?;
    Ok((StatusCode::CREATED, Json(json!(referral))))
}

#[axum::debug_handler]
pub async fn request_reschedule(
    State(state): State<Arc<AppointmentState>>,
    Extension(actor): Extension<Actor>,
    Path(appointment_id): Path<Uuid>,
    Json(body): Json<ChangeRequestBody>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let request = state.appointments.request_reschedule(appointment_id, &actor, body.reason).await?;
    Ok((StatusCode::CREATED, Json(json!(request))))
}

#[axum::debug_handler]
pub async fn request_cancel(
    State(state): State<Arc<AppointmentState>>,
    Extension(actor): Extension<Actor>,
    Path(appointment_id): Path<Uuid>,
    Json(body): Json<ChangeRequestBody>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let request = state.appointments.request_cancel(appointment_id, &actor, body.reason).await?;
    Ok((StatusCode::CREATED, Json(json!(request))))
}

// ==============================================================================
// RESCHEDULE REQUEST HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_pending_requests(
    State(state): State<Arc<AppointmentState>>,
) -> Result<Json<Value>, AppError> {
    let requests = state.requests.find_pending().await?;

    Ok(Json(json!({
        "requests": requests,
        "total": requests.len()
    })))
}

#[axum::debug_handler]
pub async fn get_request(
    State(state): State<Arc<AppointmentState>>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let request = state.requests.get(request_id).await?;
    Ok(Json(json!(request)))
}

#[axum::debug_handler]
pub async fn list_requests_for_appointment(
    State(state): State<Arc<AppointmentState>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let requests = state.requests.for_appointment(appointment_id).await?;

    Ok(Json(json!({
        "requests": requests,
        "total": requests.len()
    })))
}

#[axum::debug_handler]
pub async fn resolve_request(
    State(state): State<Arc<AppointmentState>>,
    Extension(actor): Extension<Actor>,
    Path(request_id): Path<Uuid>,
    Json(resolution): Json<ResolveRescheduleRequest>,
) -> Result<Json<Value>, AppError> {
    let request = state.appointments.resolve_request(request_id, &actor, resolution).await?;
    Ok(Json(json!(request)))
}

#[axum::debug_handler]
pub async fn withdraw_request(
    State(state): State<Arc<AppointmentState>>,
    Extension(actor): Extension<Actor>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let request = state.appointments.withdraw_request(request_id, &actor).await?;
    Ok(Json(json!(request)))
}
