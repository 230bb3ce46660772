// libs/clinician-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use shared_models::error::AppError;

// ==============================================================================
// AVAILABILITY LEDGER MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ClinicianStatus {
    Available,
    Offline,
    Busy,
    Away,
}

impl fmt::Display for ClinicianStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClinicianStatus::Available => write!(f, "available"),
            ClinicianStatus::Offline => write!(f, "offline"),
            ClinicianStatus::Busy => write!(f, "busy"),
            ClinicianStatus::Away => write!(f, "away"),
        }
    }
}

/// A time window on a clinician's calendar held by one appointment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockedSlot {
    pub appointment_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClinicianAvailability {
    pub id: Uuid,
    pub clinician_id: String,
    pub clinician_name: String,
    pub clinician_role: Option<String>,
    pub status: ClinicianStatus,
    pub hospital_id: Option<String>,
    pub department_id: Option<String>,
    pub last_status_change: DateTime<Utc>,
    #[serde(default)]
    pub blocked_slots: Vec<BlockedSlot>,
    #[serde(default)]
    pub version: i64,
}

impl ClinicianAvailability {
    /// Slots with `appointment_id`'s entry replaced by the given window.
    /// Keeps at most one entry per appointment.
    pub fn slots_with(&self, appointment_id: Uuid, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<BlockedSlot> {
        let mut slots: Vec<BlockedSlot> = self.blocked_slots.iter()
            .filter(|s| s.appointment_id != appointment_id)
            .cloned()
            .collect();
        slots.push(BlockedSlot { appointment_id, start, end });
        slots
    }

    /// Slots without any entry for `appointment_id`, or `None` when nothing would change.
    pub fn slots_without(&self, appointment_id: Uuid) -> Option<Vec<BlockedSlot>> {
        if !self.blocked_slots.iter().any(|s| s.appointment_id == appointment_id) {
            return None;
        }
        Some(self.blocked_slots.iter()
            .filter(|s| s.appointment_id != appointment_id)
            .cloned()
            .collect())
    }

    pub fn is_available(&self) -> bool {
        self.status == ClinicianStatus::Available
    }
}

/// Everything a status change writes. Blocked slots are never part of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub clinician_id: String,
    pub clinician_name: String,
    pub clinician_role: Option<String>,
    pub status: ClinicianStatus,
    pub hospital_id: Option<String>,
    pub department_id: Option<String>,
    pub last_status_change: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetStatusRequest {
    pub status: ClinicianStatus,
    pub hospital_id: Option<String>,
    pub department_id: Option<String>,
}

// ==============================================================================
// ROUND-ROBIN MODELS
// ==============================================================================

/// Partition key for independent rotations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TrackerScope {
    pub hospital_id: String,
    pub department_id: Option<String>,
}

impl TrackerScope {
    pub fn new(hospital_id: impl Into<String>, department_id: Option<&str>) -> Self {
        Self {
            hospital_id: hospital_id.into(),
            department_id: department_id.map(str::to_string),
        }
    }
}

impl fmt::Display for TrackerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.department_id {
            Some(department) => write!(f, "{}/{}", self.hospital_id, department),
            None => write!(f, "{}/*", self.hospital_id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundRobinTracker {
    pub id: Uuid,
    pub hospital_id: String,
    pub department_id: Option<String>,
    #[serde(default)]
    pub clinician_order: Vec<String>,
    #[serde(default)]
    pub current_index: i64,
    pub last_assigned_clinician_id: Option<String>,
    pub last_assigned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Where a rotation scan landed.
#[derive(Debug, Clone, PartialEq)]
pub struct RotationPick {
    pub position: usize,
    pub clinician_id: String,
    /// False when the scan found no roster member in a non-empty available set.
    pub matched: bool,
}

impl RoundRobinTracker {
    pub fn new(scope: &TrackerScope) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            hospital_id: scope.hospital_id.clone(),
            department_id: scope.department_id.clone(),
            clinician_order: Vec::new(),
            current_index: 0,
            last_assigned_clinician_id: None,
            last_assigned_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn scope(&self) -> TrackerScope {
        TrackerScope {
            hospital_id: self.hospital_id.clone(),
            department_id: self.department_id.clone(),
        }
    }

    /// Scan the roster once from `current_index`. An empty `available` set
    /// accepts any candidate; a set matching nobody falls back to the start position.
    pub fn pick_next(&self, available: &HashMap<String, String>) -> Option<RotationPick> {
        let len = self.clinician_order.len();
        if len == 0 {
            return None;
        }

        let start = self.current_index.rem_euclid(len as i64) as usize;
        for offset in 0..len {
            let position = (start + offset) % len;
            let candidate = &self.clinician_order[position];
            if available.is_empty() || available.contains_key(candidate) {
                return Some(RotationPick {
                    position,
                    clinician_id: candidate.clone(),
                    matched: true,
                });
            }
        }

        Some(RotationPick {
            position: start,
            clinician_id: self.clinician_order[start].clone(),
            matched: false,
        })
    }

    /// Move the pointer one past `pick` and stamp the assignment.
    pub fn advance_past(&mut self, pick: &RotationPick, at: DateTime<Utc>) {
        let len = self.clinician_order.len().max(1);
        self.current_index = ((pick.position + 1) % len) as i64;
        self.last_assigned_clinician_id = Some(pick.clinician_id.clone());
        self.last_assigned_at = Some(at);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RosterEntry {
    pub id: String,
    pub name: String,
}

/// Result of a successful rotation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssignedClinician {
    pub id: String,
    pub name: String,
    pub fallback: bool,
}

pub const PLACEHOLDER_CLINICIAN_NAME: &str = "Assigned clinician";

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Clone, Error)]
pub enum ClinicianError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Concurrent update on {0}; retry the request")]
    Contention(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<ClinicianError> for AppError {
    fn from(err: ClinicianError) -> Self {
        match err {
            ClinicianError::NotFound(_) => AppError::NotFound(err.to_string()),
            ClinicianError::Contention(_) => AppError::Conflict(err.to_string()),
            ClinicianError::Database(msg) => AppError::Database(msg),
        }
    }
}
