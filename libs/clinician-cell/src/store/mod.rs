//! Persistence seams for the availability ledger and rotation trackers.
//!
//! Every mutation of an existing row is conditional on the row's `version`;
//! a `None` return means another writer got there first and the caller
//! should reload and retry.

pub mod memory;
pub mod supabase;

use async_trait::async_trait;

use crate::models::{
    BlockedSlot, ClinicianAvailability, ClinicianError, RoundRobinTracker, StatusUpdate, TrackerScope,
};

pub use memory::{InMemoryAvailabilityStore, InMemoryTrackerStore};
pub use supabase::{SupabaseAvailabilityStore, SupabaseTrackerStore};

#[async_trait]
pub trait AvailabilityStore: Send + Sync {
    async fn find(&self, clinician_id: &str) -> Result<Option<ClinicianAvailability>, ClinicianError>;

    /// Insert or update the status columns. `None` work-context fields keep their stored value.
    async fn upsert_status(&self, update: &StatusUpdate) -> Result<ClinicianAvailability, ClinicianError>;

    async fn replace_slots(
        &self,
        clinician_id: &str,
        slots: &[BlockedSlot],
        expected_version: i64,
    ) -> Result<Option<ClinicianAvailability>, ClinicianError>;

    async fn list_available(
        &self,
        hospital_id: Option<&str>,
        department_id: Option<&str>,
    ) -> Result<Vec<ClinicianAvailability>, ClinicianError>;
}

#[async_trait]
pub trait TrackerStore: Send + Sync {
    async fn find(&self, scope: &TrackerScope) -> Result<Option<RoundRobinTracker>, ClinicianError>;

    async fn find_or_create(&self, scope: &TrackerScope) -> Result<RoundRobinTracker, ClinicianError>;

    /// Persist order, index and last-assignment fields when the stored version still matches.
    async fn compare_and_swap(
        &self,
        tracker: &RoundRobinTracker,
        expected_version: i64,
    ) -> Result<Option<RoundRobinTracker>, ClinicianError>;
}
