use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{
    BlockedSlot, ClinicianAvailability, ClinicianError, ClinicianStatus, RoundRobinTracker,
    StatusUpdate, TrackerScope,
};
use crate::store::{AvailabilityStore, TrackerStore};

/// Process-local ledger used in development mode and tests.
#[derive(Default)]
pub struct InMemoryAvailabilityStore {
    records: Mutex<HashMap<String, ClinicianAvailability>>,
}

impl InMemoryAvailabilityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AvailabilityStore for InMemoryAvailabilityStore {
    async fn find(&self, clinician_id: &str) -> Result<Option<ClinicianAvailability>, ClinicianError> {
        Ok(self.records.lock().await.get(clinician_id).cloned())
    }

    async fn upsert_status(&self, update: &StatusUpdate) -> Result<ClinicianAvailability, ClinicianError> {
        let mut records = self.records.lock().await;
        let record = records
            .entry(update.clinician_id.clone())
            .or_insert_with(|| ClinicianAvailability {
                id: Uuid::new_v4(),
                clinician_id: update.clinician_id.clone(),
                clinician_name: update.clinician_name.clone(),
                clinician_role: update.clinician_role.clone(),
                status: update.status,
                hospital_id: None,
                department_id: None,
                last_status_change: update.last_status_change,
                blocked_slots: Vec::new(),
                version: 0,
            });

        record.clinician_name = update.clinician_name.clone();
        record.clinician_role = update.clinician_role.clone();
        record.status = update.status;
        record.last_status_change = update.last_status_change;
        if update.hospital_id.is_some() {
            record.hospital_id = update.hospital_id.clone();
        }
        if update.department_id.is_some() {
            record.department_id = update.department_id.clone();
        }

        Ok(record.clone())
    }

    async fn replace_slots(
        &self,
        clinician_id: &str,
        slots: &[BlockedSlot],
        expected_version: i64,
    ) -> Result<Option<ClinicianAvailability>, ClinicianError> {
        let mut records = self.records.lock().await;
        match records.get_mut(clinician_id) {
            Some(record) if record.version == expected_version => {
                record.blocked_slots = slots.to_vec();
                record.version += 1;
                Ok(Some(record.clone()))
            },
            _ => Ok(None),
        }
    }

    async fn list_available(
        &self,
        hospital_id: Option<&str>,
        department_id: Option<&str>,
    ) -> Result<Vec<ClinicianAvailability>, ClinicianError> {
        let records = self.records.lock().await;
        let mut available: Vec<ClinicianAvailability> = records.values()
            .filter(|r| r.status == ClinicianStatus::Available)
            .filter(|r| hospital_id.map_or(true, |h| r.hospital_id.as_deref() == Some(h)))
            .filter(|r| department_id.map_or(true, |d| r.department_id.as_deref() == Some(d)))
            .cloned()
            .collect();
        available.sort_by(|a, b| a.clinician_name.cmp(&b.clinician_name));
        Ok(available)
    }
}

#[derive(Default)]
pub struct InMemoryTrackerStore {
    trackers: Mutex<HashMap<TrackerScope, RoundRobinTracker>>,
}

impl InMemoryTrackerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a tracker directly, e.g. with a roster and starting offset.
    pub async fn seed(&self, tracker: RoundRobinTracker) {
        self.trackers.lock().await.insert(tracker.scope(), tracker);
    }
}

#[async_trait]
impl TrackerStore for InMemoryTrackerStore {
    async fn find(&self, scope: &TrackerScope) -> Result<Option<RoundRobinTracker>, ClinicianError> {
        Ok(self.trackers.lock().await.get(scope).cloned())
    }

    async fn find_or_create(&self, scope: &TrackerScope) -> Result<RoundRobinTracker, ClinicianError> {
        let mut trackers = self.trackers.lock().await;
        Ok(trackers
            .entry(scope.clone())
            .or_insert_with(|| RoundRobinTracker::new(scope))
            .clone())
    }

    async fn compare_and_swap(
        &self,
        tracker: &RoundRobinTracker,
        expected_version: i64,
    ) -> Result<Option<RoundRobinTracker>, ClinicianError> {
        let mut trackers = self.trackers.lock().await;
        match trackers.get_mut(&tracker.scope()) {
            Some(stored) if stored.version == expected_version => {
                stored.clinician_order = tracker.clinician_order.clone();
                stored.current_index = tracker.current_index;
                stored.last_assigned_clinician_id = tracker.last_assigned_clinician_id.clone();
                stored.last_assigned_at = tracker.last_assigned_at;
                stored.version = expected_version + 1;
                stored.updated_at = Utc::now();
                Ok(Some(stored.clone()))
            },
            _ => Ok(None),
        }
    }
}
