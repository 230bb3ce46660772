use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditResource {
    Appointment,
    RescheduleRequest,
    ClinicianAvailability,
    RoundRobinTracker,
}

impl fmt::Display for AuditResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditResource::Appointment => write!(f, "appointment"),
            AuditResource::RescheduleRequest => write!(f, "reschedule_request"),
            AuditResource::ClinicianAvailability => write!(f, "clinician_availability"),
            AuditResource::RoundRobinTracker => write!(f, "round_robin_tracker"),
        }
    }
}

/// One mutating operation, as seen by the audit log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub user_id: Option<String>,
    pub action: String,
    pub resource: AuditResource,
    pub resource_id: String,
    pub status: AuditStatus,
    pub detail: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: impl Into<String>, resource: AuditResource, resource_id: impl ToString) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            user_id: None,
            action: action.into(),
            resource,
            resource_id: resource_id.to_string(),
            status: AuditStatus::Success,
            detail: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn by(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn failed(mut self, detail: impl Into<String>) -> Self {
        self.status = AuditStatus::Failure;
        self.detail = Some(detail.into());
        self
    }
}
