use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
    middleware,
};

use audit_cell::AuditTrail;
use shared_config::{AppConfig, SchedulingConfig};
use shared_database::SupabaseClient;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::{AvailabilityService, RoundRobinService, RosterProvider};
use crate::services::roster::{IdentityRosterClient, StaticRoster};
use crate::store::{
    AvailabilityStore, InMemoryAvailabilityStore, InMemoryTrackerStore, SupabaseAvailabilityStore,
    SupabaseTrackerStore, TrackerStore,
};

/// Services shared by the clinician routes. The appointment cell borrows the
/// same `availability` and `round_robin` instances.
pub struct ClinicianState {
    pub config: Arc<AppConfig>,
    pub scheduling: SchedulingConfig,
    pub availability: Arc<AvailabilityService>,
    pub round_robin: Arc<RoundRobinService>,
}

impl ClinicianState {
    /// Supabase-backed stores when configured, in-memory ones otherwise.
    pub fn from_config(config: Arc<AppConfig>, audit: AuditTrail, scheduling: SchedulingConfig) -> Self {
        let (ledger, trackers): (Arc<dyn AvailabilityStore>, Arc<dyn TrackerStore>) = if config.is_configured() {
            let supabase = Arc::new(SupabaseClient::new(&config));
            (
                Arc::new(SupabaseAvailabilityStore::new(Arc::clone(&supabase))),
                Arc::new(SupabaseTrackerStore::new(supabase)),
            )
        } else {
            (Arc::new(InMemoryAvailabilityStore::new()), Arc::new(InMemoryTrackerStore::new()))
        };

        let roster: Arc<dyn RosterProvider> = if config.is_identity_service_configured() {
            Arc::new(IdentityRosterClient::new(&config))
        } else {
            Arc::new(StaticRoster::empty())
        };

        Self::with_stores(config, ledger, trackers, roster, audit, scheduling)
    }

    pub fn with_stores(
        config: Arc<AppConfig>,
        ledger: Arc<dyn AvailabilityStore>,
        trackers: Arc<dyn TrackerStore>,
        roster: Arc<dyn RosterProvider>,
        audit: AuditTrail,
        scheduling: SchedulingConfig,
    ) -> Self {
        let availability = Arc::new(AvailabilityService::new(ledger, audit.clone(), &scheduling));
        let round_robin = Arc::new(RoundRobinService::new(
            trackers,
            Arc::clone(&availability),
            roster,
            audit,
            &scheduling,
        ));

        Self {
            config,
            scheduling,
            availability,
            round_robin,
        }
    }
}

pub fn clinician_routes(state: Arc<ClinicianState>) -> Router {
    Router::new()
        .route("/me/status", put(handlers::set_my_status))
        .route("/available", get(handlers::list_available))
        .route("/round-robin", get(handlers::get_round_robin_tracker))
        .route("/round-robin/reset", post(handlers::reset_round_robin_roster))
        .route("/{clinician_id}/availability", get(handlers::get_availability))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware))
        .with_state(state)
}
