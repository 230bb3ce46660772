// libs/appointment-cell/src/models.rs
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use clinician_cell::models::ClinicianError;
use shared_models::error::AppError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Option<String>,
    pub patient_chi: Option<String>,
    pub patient_name: Option<String>,
    pub doctor_id: Option<String>,
    pub doctor_name: Option<String>,
    pub hospital_id: String,
    pub department_id: Option<String>,
    pub scenario: Scenario,
    pub appointment_type: AppointmentType,
    pub scheduled_date: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: i32,
    pub status: AppointmentStatus,
    pub priority: Priority,
    pub reason: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub history: Vec<AppointmentEvent>,
    #[serde(default)]
    pub auto_assigned: bool,
    #[serde(default)]
    pub is_emergency_unknown: bool,
    pub emergency_alias: Option<String>,
    pub emergency_conditions: Option<String>,
    pub preferred_clinician_id: Option<String>,
    pub preferred_clinician_name: Option<String>,
    pub accepted_by_id: Option<String>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub referred_by_id: Option<String>,
    pub created_by: Option<String>,
    #[serde(default)]
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn scheduled_end(&self) -> DateTime<Utc> {
        self.scheduled_date + Duration::minutes(self.duration_minutes as i64)
    }

    /// Whether clinical records can be opened for this appointment.
    pub fn has_known_patient(&self) -> bool {
        self.patient_id.is_some() && !self.is_emergency_unknown
    }

    pub fn record(&mut self, kind: EventKind, actor_id: Option<&str>, text: Option<String>) {
        self.history.push(AppointmentEvent {
            at: Utc::now(),
            actor_id: actor_id.map(str::to_string),
            kind,
            text,
        });
    }

    /// History rendered one line per event, oldest first.
    pub fn annotations(&self) -> String {
        self.history.iter()
            .map(|event| event.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn last_event(&self) -> Option<&AppointmentEvent> {
        self.history.last()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    Emergency,
    WalkIn,
    #[default]
    Scheduled,
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scenario::Emergency => write!(f, "emergency"),
            Scenario::WalkIn => write!(f, "walk_in"),
            Scenario::Scheduled => write!(f, "scheduled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentType {
    Consultation,
    FollowUp,
    CheckUp,
    Emergency,
    Referral,
    LabReview,
    Imaging,
    NursingAssessment,
    WalkIn,
}

impl fmt::Display for AppointmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AppointmentType::Consultation => "consultation",
            AppointmentType::FollowUp => "follow_up",
            AppointmentType::CheckUp => "check_up",
            AppointmentType::Emergency => "emergency",
            AppointmentType::Referral => "referral",
            AppointmentType::LabReview => "lab_review",
            AppointmentType::Imaging => "imaging",
            AppointmentType::NursingAssessment => "nursing_assessment",
            AppointmentType::WalkIn => "walk_in",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    PendingAcceptance,
    PendingReschedule,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
    Rescheduled,
}

impl AppointmentStatus {
    pub const FINISHED: [AppointmentStatus; 4] = [
        AppointmentStatus::Cancelled,
        AppointmentStatus::Rescheduled,
        AppointmentStatus::Completed,
        AppointmentStatus::NoShow,
    ];

    /// Live appointments occupy the patient's time slot.
    pub fn is_live(&self) -> bool {
        !Self::FINISHED.contains(self)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::PendingAcceptance => "pending_acceptance",
            AppointmentStatus::PendingReschedule => "pending_reschedule",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
            AppointmentStatus::Rescheduled => "rescheduled",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Queue rank; lower is served first.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Urgent => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Urgent => write!(f, "urgent"),
            Priority::High => write!(f, "high"),
            Priority::Normal => write!(f, "normal"),
            Priority::Low => write!(f, "low"),
        }
    }
}

// ==============================================================================
// HISTORY
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    AutoAssigned,
    Accepted,
    Attended,
    CheckedIn,
    Completed,
    Cancelled,
    NoShow,
    RescheduledTo,
    RescheduledFrom,
    RescheduleRequested,
    CancelRequested,
    Referred,
    Note,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentEvent {
    pub at: DateTime<Utc>,
    pub actor_id: Option<String>,
    pub kind: EventKind,
    pub text: Option<String>,
}

impl fmt::Display for AppointmentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = serde_json::to_value(self.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        write!(f, "[{}] {}", self.at.to_rfc3339(), kind)?;
        if let Some(actor_id) = &self.actor_id {
            write!(f, " by {}", actor_id)?;
        }
        if let Some(text) = &self.text {
            write!(f, ": {}", text)?;
        }
        Ok(())
    }
}

// ==============================================================================
// INTAKE
// ==============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient_id: Option<String>,
    pub patient_chi: Option<String>,
    pub patient_name: Option<String>,
    pub doctor_id: Option<String>,
    pub doctor_name: Option<String>,
    pub hospital_id: String,
    pub department_id: Option<String>,
    pub scenario: Option<Scenario>,
    pub appointment_type: Option<AppointmentType>,
    pub scheduled_date: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i32>,
    pub priority: Option<Priority>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub auto_assign: bool,
    #[serde(default)]
    pub is_emergency_unknown: bool,
    pub emergency_alias: Option<String>,
    pub emergency_conditions: Option<String>,
    pub preferred_clinician_id: Option<String>,
    pub preferred_clinician_name: Option<String>,
}

pub const MAX_CHI_LENGTH: usize = 11;

/// How the clinician for a new appointment is chosen.
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    Preferred { id: String, name: Option<String> },
    Explicit { doctor_id: Option<String>, doctor_name: Option<String> },
    RoundRobin,
}

/// Per-scenario intake rules. Built once from a create request; everything
/// scenario-dependent about a new appointment is decided here.
#[derive(Debug, Clone, PartialEq)]
pub enum IntakePlan {
    Emergency { assignment: Assignment },
    WalkIn { assignment: Assignment },
    Scheduled { scheduled_date: DateTime<Utc>, assignment: Assignment },
}

impl IntakePlan {
    pub fn scenario(&self) -> Scenario {
        match self {
            IntakePlan::Emergency { .. } => Scenario::Emergency,
            IntakePlan::WalkIn { .. } => Scenario::WalkIn,
            IntakePlan::Scheduled { .. } => Scenario::Scheduled,
        }
    }

    pub fn assignment(&self) -> &Assignment {
        match self {
            IntakePlan::Emergency { assignment }
            | IntakePlan::WalkIn { assignment }
            | IntakePlan::Scheduled { assignment, .. } => assignment,
        }
    }

    pub fn scheduled_date(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            IntakePlan::Scheduled { scheduled_date, .. } => *scheduled_date,
            IntakePlan::Emergency { .. } | IntakePlan::WalkIn { .. } => now,
        }
    }

    pub fn priority(&self, requested: Option<Priority>) -> Priority {
        match self {
            IntakePlan::Emergency { .. } => Priority::Urgent,
            _ => requested.unwrap_or_default(),
        }
    }

    /// `has_doctor` is whether a clinician ended up on the appointment.
    pub fn initial_status(&self, has_doctor: bool) -> AppointmentStatus {
        match self {
            IntakePlan::Emergency { .. } => AppointmentStatus::PendingAcceptance,
            IntakePlan::WalkIn { .. } => AppointmentStatus::InProgress,
            IntakePlan::Scheduled { assignment: Assignment::RoundRobin, .. } if !has_doctor => {
                AppointmentStatus::PendingAcceptance
            },
            IntakePlan::Scheduled { .. } => AppointmentStatus::Scheduled,
        }
    }

    pub fn default_type(&self) -> AppointmentType {
        match self {
            IntakePlan::Emergency { .. } => AppointmentType::Emergency,
            IntakePlan::WalkIn { .. } => AppointmentType::WalkIn,
            IntakePlan::Scheduled { .. } => AppointmentType::Consultation,
        }
    }
}

fn present(value: &Option<String>) -> Option<String> {
    value.as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl TryFrom<&CreateAppointmentRequest> for IntakePlan {
    type Error = AppointmentError;

    fn try_from(request: &CreateAppointmentRequest) -> Result<Self, Self::Error> {
        if request.hospital_id.trim().is_empty() {
            return Err(AppointmentError::Validation("hospital_id is required".to_string()));
        }
        if let Some(duration) = request.duration_minutes {
            if duration < 1 {
                return Err(AppointmentError::Validation(
                    "duration_minutes must be at least 1".to_string(),
                ));
            }
        }
        if let Some(chi) = &request.patient_chi {
            if chi.chars().count() > MAX_CHI_LENGTH {
                return Err(AppointmentError::Validation(format!(
                    "patient_chi must be at most {} characters", MAX_CHI_LENGTH
                )));
            }
        }

        let doctor_id = present(&request.doctor_id);
        let doctor_name = present(&request.doctor_name);

        // Emergency and walk-in only rotate when no doctor was named
        let unscheduled = match &doctor_id {
            Some(_) => Assignment::Explicit { doctor_id: doctor_id.clone(), doctor_name: doctor_name.clone() },
            None => Assignment::RoundRobin,
        };

        match request.scenario.unwrap_or_default() {
            Scenario::Emergency => Ok(IntakePlan::Emergency { assignment: unscheduled }),
            Scenario::WalkIn => Ok(IntakePlan::WalkIn { assignment: unscheduled }),
            Scenario::Scheduled => {
                let scheduled_date = request.scheduled_date.ok_or_else(|| {
                    AppointmentError::Validation(
                        "scheduled_date is required for scheduled appointments".to_string(),
                    )
                })?;

                let assignment = if let Some(id) = present(&request.preferred_clinician_id) {
                    Assignment::Preferred { id, name: present(&request.preferred_clinician_name) }
                } else if request.auto_assign || (doctor_id.is_none() && doctor_name.is_none()) {
                    Assignment::RoundRobin
                } else {
                    Assignment::Explicit { doctor_id, doctor_name }
                };

                Ok(IntakePlan::Scheduled { scheduled_date, assignment })
            },
        }
    }
}

// ==============================================================================
// TRANSITION REQUESTS
// ==============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcceptAppointmentRequest {
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompleteAppointmentRequest {
    pub notes: Option<String>,
    #[serde(default)]
    pub create_encounter: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub new_date: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferAppointmentRequest {
    pub new_doctor_id: String,
    pub new_doctor_name: Option<String>,
    pub reason: Option<String>,
}

/// Body of a reschedule or cancel request raised against an appointment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRequestBody {
    pub reason: String,
}

/// Both rows touched by a reschedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleOutcome {
    pub original: Appointment,
    pub replacement: Appointment,
}

// ==============================================================================
// RESCHEDULE / CANCEL REQUESTS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Reschedule,
    Cancel,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "pending"),
            RequestStatus::Approved => write!(f, "approved"),
            RequestStatus::Rejected => write!(f, "rejected"),
            RequestStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Approved,
    Rejected,
}

impl From<Resolution> for RequestStatus {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Approved => RequestStatus::Approved,
            Resolution::Rejected => RequestStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RescheduleRequest {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub requested_by_id: String,
    pub requested_by_name: String,
    pub requested_by_role: Option<String>,
    pub reason: String,
    #[serde(rename = "type")]
    pub request_type: RequestType,
    pub status: RequestStatus,
    /// Appointment status before a reschedule request parked it.
    pub previous_status: Option<AppointmentStatus>,
    pub resolved_by_id: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub new_date: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
    #[serde(default)]
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveRescheduleRequest {
    pub resolution: Resolution,
    pub new_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

// ==============================================================================
// QUERIES
// ==============================================================================

/// Conjunctive filter; `None` fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentFilter {
    pub doctor_id: Option<String>,
    pub patient_id: Option<String>,
    pub hospital_id: Option<String>,
    #[serde(default)]
    pub statuses: Vec<AppointmentStatus>,
    pub appointment_type: Option<AppointmentType>,
    pub scenario: Option<Scenario>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

impl AppointmentFilter {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        fn eq_opt(wanted: &Option<String>, actual: &Option<String>) -> bool {
            wanted.as_ref().map_or(true, |w| actual.as_ref() == Some(w))
        }

        eq_opt(&self.doctor_id, &appointment.doctor_id)
            && eq_opt(&self.patient_id, &appointment.patient_id)
            && self.hospital_id.as_ref().map_or(true, |h| *h == appointment.hospital_id)
            && (self.statuses.is_empty() || self.statuses.contains(&appointment.status))
            && self.appointment_type.map_or(true, |t| t == appointment.appointment_type)
            && self.scenario.map_or(true, |s| s == appointment.scenario)
            && self.date_from.map_or(true, |from| appointment.scheduled_date >= from)
            && self.date_to.map_or(true, |to| appointment.scheduled_date < to)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    ScheduledDate,
    CreatedAt,
    UpdatedAt,
    Priority,
    Status,
}

impl SortField {
    /// Unknown names fall back to `ScheduledDate`.
    pub fn parse(name: Option<&str>) -> Self {
        match name {
            Some("createdAt") | Some("created_at") => SortField::CreatedAt,
            Some("updatedAt") | Some("updated_at") => SortField::UpdatedAt,
            Some("priority") => SortField::Priority,
            Some("status") => SortField::Status,
            _ => SortField::ScheduledDate,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            SortField::ScheduledDate => "scheduled_date",
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
            SortField::Priority => "priority",
            SortField::Status => "status",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(name: Option<&str>) -> Self {
        match name.map(str::to_ascii_uppercase).as_deref() {
            Some("ASC") => SortOrder::Asc,
            _ => SortOrder::Desc,
        }
    }

    pub fn as_postgrest(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub field: SortField,
    pub order: SortOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based.
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub fn offset(&self) -> u32 {
        (self.page.max(1) - 1).saturating_mul(self.limit)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindAppointmentsQuery {
    pub doctor_id: Option<String>,
    pub patient_id: Option<String>,
    pub hospital_id: Option<String>,
    pub status: Option<AppointmentStatus>,
    pub appointment_type: Option<AppointmentType>,
    pub scenario: Option<Scenario>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: usize,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum DashboardStats {
    Clinician {
        today: usize,
        upcoming: usize,
        completed: usize,
        pending_acceptance: usize,
    },
    Hospital {
        today: usize,
        upcoming: usize,
        cancelled_today: usize,
        pending_acceptance: usize,
        pending_reschedule: usize,
    },
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Clone, Error)]
pub enum AppointmentError {
    #[error("Appointment {0} not found")]
    NotFound(Uuid),

    #[error("Reschedule request {0} not found")]
    RequestNotFound(Uuid),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Cannot {action} an appointment that is {current}; it must be {required}")]
    InvalidState {
        action: &'static str,
        current: AppointmentStatus,
        required: String,
    },

    #[error("{0}")]
    Forbidden(String),

    #[error("Concurrent update on {0}; retry the request")]
    Contention(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<ClinicianError> for AppointmentError {
    fn from(err: ClinicianError) -> Self {
        match err {
            ClinicianError::Contention(what) => AppointmentError::Contention(what),
            ClinicianError::NotFound(_) | ClinicianError::Database(_) => {
                AppointmentError::Database(err.to_string())
            },
        }
    }
}

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        match err {
            AppointmentError::NotFound(_) | AppointmentError::RequestNotFound(_) => {
                AppError::NotFound(err.to_string())
            },
            AppointmentError::Validation(msg) => AppError::ValidationError(msg),
            AppointmentError::InvalidState { .. } => AppError::BadRequest(err.to_string()),
            AppointmentError::Conflict(msg) => AppError::Conflict(msg),
            AppointmentError::Forbidden(msg) => AppError::Forbidden(msg),
            AppointmentError::Contention(_) => AppError::Conflict(err.to_string()),
            AppointmentError::Database(msg) => AppError::Database(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn scheduled(at: DateTime<Utc>) -> CreateAppointmentRequest {
        CreateAppointmentRequest {
            hospital_id: "H1".to_string(),
            scheduled_date: Some(at),
            ..Default::default()
        }
    }

    #[test]
    fn test_scheduled_without_date_is_rejected() {
        let request = CreateAppointmentRequest {
            hospital_id: "H1".to_string(),
            ..Default::default()
        };
        assert_matches!(IntakePlan::try_from(&request), Err(AppointmentError::Validation(_)));
    }

    #[test]
    fn test_bad_duration_and_chi_are_rejected() {
        let mut request = scheduled(Utc::now());
        request.duration_minutes = Some(0);
        assert_matches!(IntakePlan::try_from(&request), Err(AppointmentError::Validation(_)));

        let mut request = scheduled(Utc::now());
        request.patient_chi = Some("123456789012".to_string());
        assert_matches!(IntakePlan::try_from(&request), Err(AppointmentError::Validation(_)));
    }

    #[test]
    fn test_scheduled_assignment_policy() {
        let at = Utc::now();

        let mut preferred = scheduled(at);
        preferred.preferred_clinician_id = Some("D7".to_string());
        preferred.doctor_id = Some("D1".to_string());
        assert_matches!(
            IntakePlan::try_from(&preferred).unwrap().assignment(),
            Assignment::Preferred { id, .. } if id == "D7"
        );

        assert_eq!(IntakePlan::try_from(&scheduled(at)).unwrap().assignment(), &Assignment::RoundRobin);

        let mut named = scheduled(at);
        named.doctor_name = Some("Dr Who".to_string());
        assert_matches!(
            IntakePlan::try_from(&named).unwrap().assignment(),
            Assignment::Explicit { doctor_id: None, .. }
        );

        named.auto_assign = true;
        assert_eq!(IntakePlan::try_from(&named).unwrap().assignment(), &Assignment::RoundRobin);
    }

    #[test]
    fn test_scenario_forces_priority_and_status() {
        let emergency = CreateAppointmentRequest {
            hospital_id: "H1".to_string(),
            scenario: Some(Scenario::Emergency),
            ..Default::default()
        };
        let plan = IntakePlan::try_from(&emergency).unwrap();
        assert_eq!(plan.priority(Some(Priority::Low)), Priority::Urgent);
        assert_eq!(plan.initial_status(true), AppointmentStatus::PendingAcceptance);

        let walk_in = CreateAppointmentRequest { scenario: Some(Scenario::WalkIn), ..emergency };
        let plan = IntakePlan::try_from(&walk_in).unwrap();
        assert_eq!(plan.initial_status(false), AppointmentStatus::InProgress);

        let plan = IntakePlan::try_from(&scheduled(Utc::now())).unwrap();
        assert_eq!(plan.initial_status(false), AppointmentStatus::PendingAcceptance);
        assert_eq!(plan.initial_status(true), AppointmentStatus::Scheduled);
    }

    #[test]
    fn test_sort_allow_list_falls_back() {
        assert_eq!(SortField::parse(Some("createdAt")), SortField::CreatedAt);
        assert_eq!(SortField::parse(Some("patient_id; drop table")), SortField::ScheduledDate);
        assert_eq!(SortField::parse(None), SortField::ScheduledDate);
        assert_eq!(SortOrder::parse(Some("asc")), SortOrder::Asc);
        assert_eq!(SortOrder::parse(Some("sideways")), SortOrder::Desc);
    }

    #[test]
    fn test_offset_saturates_on_huge_pages() {
        assert_eq!(PageRequest { page: 0, limit: 20 }.offset(), 0);
        assert_eq!(PageRequest { page: 3, limit: 20 }.offset(), 40);
        assert_eq!(PageRequest { page: u32::MAX, limit: 100 }.offset(), u32::MAX);
    }

    #[test]
    fn test_live_statuses() {
        assert!(AppointmentStatus::PendingReschedule.is_live());
        assert!(!AppointmentStatus::NoShow.is_live());
        assert!(!AppointmentStatus::Rescheduled.is_live());
    }
}
