use anyhow::{anyhow, Result};
use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use shared_config::AppConfig;

use crate::models::{AuditEvent, AuditStatus};

/// Sink for audit events. Implementations may fail; callers go through
/// `AuditTrail`, which never lets a failure reach the scheduling operation.
#[async_trait]
pub trait AuditPublisher: Send + Sync {
    async fn publish(&self, event: &AuditEvent) -> Result<()>;
}

/// Pushes JSON-encoded events onto a Redis list consumed by the audit service.
pub struct RedisAuditPublisher {
    pool: Pool,
    stream_key: String,
}

impl RedisAuditPublisher {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let redis_url = config.redis_url.clone()
            .ok_or_else(|| anyhow!("REDIS_URL is not configured"))?;

        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| anyhow!("Failed to create Redis pool: {}", e))?;

        info!("Redis audit publisher initialised on key {}", config.audit_stream_key);

        Ok(Self {
            pool,
            stream_key: config.audit_stream_key.clone(),
        })
    }
}

#[async_trait]
impl AuditPublisher for RedisAuditPublisher {
    async fn publish(&self, event: &AuditEvent) -> Result<()> {
        let mut conn = self.pool.get().await
            .map_err(|e| anyhow!("Redis connection error: {}", e))?;

        let payload = serde_json::to_string(event)?;
        let _: () = conn.lpush(&self.stream_key, payload).await?;

        debug!("Audit event {} pushed to {}", event.event_id, self.stream_key);
        Ok(())
    }
}

/// Writes events to the structured log only. Used when no audit stream is configured.
pub struct TracingAuditPublisher;

#[async_trait]
impl AuditPublisher for TracingAuditPublisher {
    async fn publish(&self, event: &AuditEvent) -> Result<()> {
        match event.status {
            AuditStatus::Success => {
                info!(
                    event_id = %event.event_id,
                    user_id = ?event.user_id,
                    resource = %event.resource,
                    resource_id = %event.resource_id,
                    "AUDIT: {}", event.action
                );
            },
            AuditStatus::Failure => {
                warn!(
                    event_id = %event.event_id,
                    user_id = ?event.user_id,
                    resource = %event.resource,
                    resource_id = %event.resource_id,
                    detail = ?event.detail,
                    "AUDIT FAILURE: {}", event.action
                );
            },
        }
        Ok(())
    }
}

/// Keeps published events in memory so tests can inspect them.
#[derive(Default)]
pub struct RecordingAuditPublisher {
    events: Mutex<Vec<AuditEvent>>,
    fail: bool,
}

impl RecordingAuditPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A publisher whose every call errors after recording the event.
    pub fn failing() -> Self {
        Self { events: Mutex::new(Vec::new()), fail: true }
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.action).collect()
    }

    /// Yield to the runtime until `count` events have arrived or the budget runs out.
    pub async fn wait_for(&self, count: usize) -> Vec<AuditEvent> {
        for _ in 0..100 {
            if self.events().len() >= count {
                break;
            }
            tokio::task::yield_now().await;
        }
        self.events()
    }
}

#[async_trait]
impl AuditPublisher for RecordingAuditPublisher {
    async fn publish(&self, event: &AuditEvent) -> Result<()> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        if self.fail {
            return Err(anyhow!("audit sink unavailable"));
        }
        Ok(())
    }
}
