use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use shared_config::AppConfig;

use crate::models::{RosterEntry, TrackerScope};

/// Source of the clinicians eligible for a rotation scope.
#[async_trait]
pub trait RosterProvider: Send + Sync {
    async fn clinicians(&self, scope: &TrackerScope) -> Result<Vec<RosterEntry>>;
}

/// Reads rosters from the identity service.
pub struct IdentityRosterClient {
    client: Client,
    base_url: String,
}

impl IdentityRosterClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.identity_service_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl RosterProvider for IdentityRosterClient {
    async fn clinicians(&self, scope: &TrackerScope) -> Result<Vec<RosterEntry>> {
        let url = format!("{}/users/clinicians", self.base_url);
        debug!("Fetching roster for scope {} from {}", scope, url);

        let mut query = vec![("hospitalId", scope.hospital_id.as_str())];
        if let Some(department_id) = scope.department_id.as_deref() {
            query.push(("departmentId", department_id));
        }

        let response = self.client.get(&url).query(&query).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Identity service error ({}): {}", status, body));
        }

        Ok(response.json::<Vec<RosterEntry>>().await?)
    }
}

/// Fixed roster; also counts lookups so callers can see when a refresh happened.
#[derive(Default)]
pub struct StaticRoster {
    entries: Mutex<Vec<RosterEntry>>,
    fail: bool,
    lookups: AtomicUsize,
}

impl StaticRoster {
    pub fn new(entries: Vec<RosterEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
            fail: false,
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// A roster whose every lookup errors.
    pub fn unreachable() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self::new(pairs.iter()
            .map(|(id, name)| RosterEntry { id: id.to_string(), name: name.to_string() })
            .collect())
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RosterProvider for StaticRoster {
    async fn clinicians(&self, _scope: &TrackerScope) -> Result<Vec<RosterEntry>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("roster service unreachable"));
        }
        Ok(self.entries.lock().map(|e| e.clone()).unwrap_or_default())
    }
}
