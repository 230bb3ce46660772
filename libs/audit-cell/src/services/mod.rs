pub mod publisher;
pub mod trail;

pub use publisher::{
    AuditPublisher, RecordingAuditPublisher, RedisAuditPublisher, TracingAuditPublisher,
};
pub use trail::AuditTrail;
