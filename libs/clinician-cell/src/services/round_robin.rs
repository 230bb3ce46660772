use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use audit_cell::{AuditEvent, AuditResource, AuditTrail};
use shared_config::SchedulingConfig;
use shared_models::auth::Actor;

use crate::models::{
    AssignedClinician, ClinicianError, RosterEntry, RotationPick, RoundRobinTracker, TrackerScope,
    PLACEHOLDER_CLINICIAN_NAME,
};
use crate::services::{AvailabilityService, RosterProvider};
use crate::store::TrackerStore;

/// Fair rotation over a scope's roster, preferring clinicians the ledger
/// reports as available.
pub struct RoundRobinService {
    trackers: Arc<dyn TrackerStore>,
    availability: Arc<AvailabilityService>,
    roster: Arc<dyn RosterProvider>,
    audit: AuditTrail,
    max_write_attempts: u32,
}

impl RoundRobinService {
    pub fn new(
        trackers: Arc<dyn TrackerStore>,
        availability: Arc<AvailabilityService>,
        roster: Arc<dyn RosterProvider>,
        audit: AuditTrail,
        config: &SchedulingConfig,
    ) -> Self {
        Self {
            trackers,
            availability,
            roster,
            audit,
            max_write_attempts: config.max_write_attempts.max(1),
        }
    }

    /// Next clinician for the scope, or `None` when the roster is empty.
    ///
    /// Every successful call advances the tracker exactly once. The advance is
    /// a conditional write on the tracker's version, so concurrent callers
    /// never hand out the same position twice.
    #[instrument(skip(self))]
    pub async fn get_next_clinician(
        &self,
        hospital_id: &str,
        department_id: Option<&str>,
    ) -> Result<Option<AssignedClinician>, ClinicianError> {
        let scope = TrackerScope::new(hospital_id, department_id);

        for attempt in 1..=self.max_write_attempts {
            let mut tracker = self.trackers.find_or_create(&scope).await?;
            let expected_version = tracker.version;

            let mut roster_names = HashMap::new();
            if tracker.clinician_order.is_empty() {
                let roster = self.fetch_roster(&scope).await;
                tracker.clinician_order = roster.iter().map(|e| e.id.clone()).collect();
                tracker.current_index = 0;
                roster_names.extend(roster.into_iter().map(|e| (e.id, e.name)));
            }

            if tracker.clinician_order.is_empty() {
                info!("No clinicians on the roster for {}", scope);
                return Ok(None);
            }

            let available: HashMap<String, String> = self.availability
                .list_available(Some(hospital_id), department_id)
                .await?
                .into_iter()
                .map(|record| (record.clinician_id, record.clinician_name))
                .collect();

            let Some(pick) = tracker.pick_next(&available) else {
                return Ok(None);
            };
            tracker.advance_past(&pick, Utc::now());

            if self.trackers.compare_and_swap(&tracker, expected_version).await?.is_none() {
                debug!("Tracker {} moved underneath us (attempt {})", scope, attempt);
                continue;
            }

            if !pick.matched {
                warn!(
                    "No rostered clinician is available in {}; falling back to {}",
                    scope, pick.clinician_id
                );
            }

            let name = self.display_name(&pick, &available, &roster_names).await;
            info!("Round-robin picked {} for {}", pick.clinician_id, scope);

            return Ok(Some(AssignedClinician {
                id: pick.clinician_id,
                name,
                fallback: !pick.matched,
            }));
        }

        Err(ClinicianError::Contention(format!("round-robin tracker {}", scope)))
    }

    pub async fn get_tracker(
        &self,
        hospital_id: &str,
        department_id: Option<&str>,
    ) -> Result<RoundRobinTracker, ClinicianError> {
        let scope = TrackerScope::new(hospital_id, department_id);
        self.trackers.find(&scope).await?
            .ok_or_else(|| ClinicianError::NotFound(format!("Round-robin tracker {}", scope)))
    }

    /// Clear the scope's rotation order so the next assignment reloads the roster.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn reset_roster(
        &self,
        actor: &Actor,
        hospital_id: &str,
        department_id: Option<&str>,
    ) -> Result<RoundRobinTracker, ClinicianError> {
        let scope = TrackerScope::new(hospital_id, department_id);

        for _ in 0..self.max_write_attempts {
            let mut tracker = self.trackers.find_or_create(&scope).await?;
            let expected_version = tracker.version;
            tracker.clinician_order.clear();
            tracker.current_index = 0;

            if let Some(saved) = self.trackers.compare_and_swap(&tracker, expected_version).await? {
                info!("Roster for {} cleared", scope);
                self.audit.record(
                    AuditEvent::new("round_robin.reset_roster", AuditResource::RoundRobinTracker, saved.id)
                        .by(actor.id.clone()),
                );
                return Ok(saved);
            }
        }

        Err(ClinicianError::Contention(format!("round-robin tracker {}", scope)))
    }

    async fn fetch_roster(&self, scope: &TrackerScope) -> Vec<RosterEntry> {
        match self.roster.clinicians(scope).await {
            Ok(entries) => {
                debug!("Loaded {} roster entries for {}", entries.len(), scope);
                entries
            }
            Err(e) => {
                warn!("Roster refresh for {} failed, continuing without one: {}", scope, e);
                Vec::new()
            }
        }
    }

    async fn display_name(
        &self,
        pick: &RotationPick,
        available: &HashMap<String, String>,
        roster_names: &HashMap<String, String>,
    ) -> String {
        if !pick.matched {
            return PLACEHOLDER_CLINICIAN_NAME.to_string();
        }
        if let Some(name) = available.get(&pick.clinician_id).or_else(|| roster_names.get(&pick.clinician_id)) {
            return name.clone();
        }
        match self.availability.get(&pick.clinician_id).await {
            Ok(record) => record.clinician_name,
            Err(_) => PLACEHOLDER_CLINICIAN_NAME.to_string(),
        }
    }
}
