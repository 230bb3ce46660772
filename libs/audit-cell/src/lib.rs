// =====================================================================================
// AUDIT CELL - FIRE-AND-FORGET AUDIT EVENTS FOR SCHEDULING MUTATIONS
// =====================================================================================

pub mod models;
pub mod services;

pub use models::{AuditEvent, AuditStatus, AuditResource};
pub use services::{
    AuditPublisher, AuditTrail, RecordingAuditPublisher,
    RedisAuditPublisher, TracingAuditPublisher,
};
