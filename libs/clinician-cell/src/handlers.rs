use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use shared_models::auth::Actor;
use shared_models::error::AppError;

use crate::models::SetStatusRequest;
use crate::router::ClinicianState;

#[derive(Debug, Deserialize)]
pub struct ScopeQuery {
    pub hospital_id: Option<String>,
    pub department_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TrackerScopeParams {
    pub hospital_id: String,
    pub department_id: Option<String>,
}

#[axum::debug_handler]
pub async fn set_my_status(
    State(state): State<Arc<ClinicianState>>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<SetStatusRequest>,
) -> Result<Json<Value>, AppError> {
    if !state.scheduling.is_clinician_role(actor.role()) {
        return Err(AppError::Forbidden("Only clinicians can set an availability status".to_string()));
    }

    let record = state.availability.set_status(&actor, request).await?;
    Ok(Json(json!(record)))
}

#[axum::debug_handler]
pub async fn list_available(
    State(state): State<Arc<ClinicianState>>,
    Query(query): Query<ScopeQuery>,
) -> Result<Json<Value>, AppError> {
    let clinicians = state.availability
        .list_available(query.hospital_id.as_deref(), query.department_id.as_deref())
        .await?;

    Ok(Json(json!({
        "clinicians": clinicians,
        "total": clinicians.len()
    })))
}

#[axum::debug_handler]
pub async fn get_availability(
    State(state): State<Arc<ClinicianState>>,
    Path(clinician_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let record = state.availability.get(&clinician_id).await?;
    Ok(Json(json!(record)))
}

#[axum::debug_handler]
pub async fn get_round_robin_tracker(
    State(state): State<Arc<ClinicianState>>,
    Query(params): Query<TrackerScopeParams>,
) -> Result<Json<Value>, AppError> {
    let tracker = state.round_robin
        .get_tracker(&params.hospital_id, params.department_id.as_deref())
        .await?;
    Ok(Json(json!(tracker)))
}

#[axum::debug_handler]
pub async fn reset_round_robin_roster(
    State(state): State<Arc<ClinicianState>>,
    Extension(actor): Extension<Actor>,
    Json(params): Json<TrackerScopeParams>,
) -> Result<Json<Value>, AppError> {
    if !state.scheduling.is_admin_role(actor.role()) {
        return Err(AppError::Forbidden("Only administrators can reset a rotation".to_string()));
    }

    let tracker = state.round_robin
        .reset_roster(&actor, &params.hospital_id, params.department_id.as_deref())
        .await?;
    Ok(Json(json!(tracker)))
}
