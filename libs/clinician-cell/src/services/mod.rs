pub mod availability;
pub mod roster;
pub mod round_robin;

pub use availability::AvailabilityService;
pub use roster::{IdentityRosterClient, RosterProvider, StaticRoster};
pub use round_robin::RoundRobinService;
