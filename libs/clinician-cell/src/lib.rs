pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod store;

pub use models::*;
pub use services::{AvailabilityService, RoundRobinService, RosterProvider};
pub use router::{clinician_routes, ClinicianState};
