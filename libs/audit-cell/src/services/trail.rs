use std::sync::Arc;
use tracing::warn;

use shared_config::AppConfig;

use crate::models::AuditEvent;
use crate::services::publisher::{AuditPublisher, RedisAuditPublisher, TracingAuditPublisher};

/// Fire-and-forget front for an `AuditPublisher`.
#[derive(Clone)]
pub struct AuditTrail {
    publisher: Arc<dyn AuditPublisher>,
}

impl AuditTrail {
    pub fn new(publisher: Arc<dyn AuditPublisher>) -> Self {
        Self { publisher }
    }

    /// Redis when `REDIS_URL` is set, the structured log otherwise.
    pub fn from_config(config: &AppConfig) -> Self {
        if config.redis_url.is_some() {
            match RedisAuditPublisher::new(config) {
                Ok(publisher) => return Self::new(Arc::new(publisher)),
                Err(e) => warn!("Falling back to tracing audit publisher: {}", e),
            }
        }
        Self::new(Arc::new(TracingAuditPublisher))
    }

    /// Spawn the publish; the caller never waits on or sees its outcome.
    pub fn record(&self, event: AuditEvent) {
        let publisher = Arc::clone(&self.publisher);
        tokio::spawn(async move {
            if let Err(e) = publisher.publish(&event).await {
                warn!(
                    event_id = %event.event_id,
                    action = %event.action,
                    "Audit publish failed: {}", e
                );
            }
        });
    }
}
