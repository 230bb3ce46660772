use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use shared_database::supabase::{SupabaseClient, SupabaseError};

use crate::models::{
    BlockedSlot, ClinicianAvailability, ClinicianError, RoundRobinTracker, StatusUpdate, TrackerScope,
};
use crate::store::{AvailabilityStore, TrackerStore};

const AVAILABILITY_TABLE: &str = "/rest/v1/clinician_availability";
const TRACKER_TABLE: &str = "/rest/v1/round_robin_trackers";

fn eq(value: &str) -> String {
    format!("eq.{}", urlencoding::encode(value))
}

fn db_error(e: anyhow::Error) -> ClinicianError {
    ClinicianError::Database(e.to_string())
}

fn parse_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, ClinicianError> {
    rows.into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| ClinicianError::Database(format!("Failed to parse row: {}", e)))
}

fn first<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Option<T>, ClinicianError> {
    Ok(parse_rows(rows)?.into_iter().next())
}

pub struct SupabaseAvailabilityStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseAvailabilityStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl AvailabilityStore for SupabaseAvailabilityStore {
    async fn find(&self, clinician_id: &str) -> Result<Option<ClinicianAvailability>, ClinicianError> {
        let path = format!("{}?clinician_id={}", AVAILABILITY_TABLE, eq(clinician_id));
        let rows: Vec<Value> = self.supabase.request(Method::GET, &path, None, None)
            .await
            .map_err(db_error)?;
        first(rows)
    }

    async fn upsert_status(&self, update: &StatusUpdate) -> Result<ClinicianAvailability, ClinicianError> {
        let mut body = serde_json::Map::new();
        body.insert("clinician_id".to_string(), json!(update.clinician_id));
        body.insert("clinician_name".to_string(), json!(update.clinician_name));
        body.insert("clinician_role".to_string(), json!(update.clinician_role));
        body.insert("status".to_string(), json!(update.status));
        body.insert("last_status_change".to_string(), json!(update.last_status_change.to_rfc3339()));
        if let Some(hospital_id) = &update.hospital_id {
            body.insert("hospital_id".to_string(), json!(hospital_id));
        }
        if let Some(department_id) = &update.department_id {
            body.insert("department_id".to_string(), json!(department_id));
        }

        let path = format!("{}?on_conflict=clinician_id", AVAILABILITY_TABLE);
        let rows: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            &path,
            None,
            Some(Value::Object(body)),
            Some(SupabaseClient::merge_duplicates()),
        ).await.map_err(db_error)?;

        first(rows)?.ok_or_else(|| {
            ClinicianError::Database("Upsert returned no availability row".to_string())
        })
    }

    async fn replace_slots(
        &self,
        clinician_id: &str,
        slots: &[BlockedSlot],
        expected_version: i64,
    ) -> Result<Option<ClinicianAvailability>, ClinicianError> {
        let path = format!(
            "{}?clinician_id={}&version=eq.{}",
            AVAILABILITY_TABLE, eq(clinician_id), expected_version
        );
        let body = json!({
            "blocked_slots": slots,
            "version": expected_version + 1,
        });

        let rows: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            None,
            Some(body),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(db_error)?;

        if rows.is_empty() {
            debug!("Blocked-slot write for {} lost a version race", clinician_id);
        }
        first(rows)
    }

    async fn list_available(
        &self,
        hospital_id: Option<&str>,
        department_id: Option<&str>,
    ) -> Result<Vec<ClinicianAvailability>, ClinicianError> {
        let mut query_parts = vec!["status=eq.available".to_string()];
        if let Some(hospital_id) = hospital_id {
            query_parts.push(format!("hospital_id={}", eq(hospital_id)));
        }
        if let Some(department_id) = department_id {
            query_parts.push(format!("department_id={}", eq(department_id)));
        }
        query_parts.push("order=clinician_name.asc".to_string());

        let path = format!("{}?{}", AVAILABILITY_TABLE, query_parts.join("&"));
        let rows: Vec<Value> = self.supabase.request(Method::GET, &path, None, None)
            .await
            .map_err(db_error)?;
        parse_rows(rows)
    }
}

pub struct SupabaseTrackerStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseTrackerStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    fn scope_filter(scope: &TrackerScope) -> String {
        let department = match &scope.department_id {
            Some(department_id) => format!("department_id={}", eq(department_id)),
            None => "department_id=is.null".to_string(),
        };
        format!("hospital_id={}&{}", eq(&scope.hospital_id), department)
    }
}

#[async_trait]
impl TrackerStore for SupabaseTrackerStore {
    async fn find(&self, scope: &TrackerScope) -> Result<Option<RoundRobinTracker>, ClinicianError> {
        let path = format!("{}?{}", TRACKER_TABLE, Self::scope_filter(scope));
        let rows: Vec<Value> = self.supabase.request(Method::GET, &path, None, None)
            .await
            .map_err(db_error)?;
        first(rows)
    }

    async fn find_or_create(&self, scope: &TrackerScope) -> Result<RoundRobinTracker, ClinicianError> {
        if let Some(tracker) = self.find(scope).await? {
            return Ok(tracker);
        }

        let fresh = RoundRobinTracker::new(scope);
        let created: anyhow::Result<Vec<Value>> = self.supabase.request_with_headers(
            Method::POST,
            TRACKER_TABLE,
            None,
            Some(json!(fresh)),
            Some(SupabaseClient::return_representation()),
        ).await;

        match created {
            Ok(rows) => first(rows)?.ok_or_else(|| {
                ClinicianError::Database("Insert returned no tracker row".to_string())
            }),
            // Another request created the scope's tracker between our read and insert
            Err(e) if SupabaseError::is_conflict(&e) => self.find(scope).await?
                .ok_or_else(|| ClinicianError::Contention(format!("round-robin tracker {}", scope))),
            Err(e) => Err(db_error(e)),
        }
    }

    async fn compare_and_swap(
        &self,
        tracker: &RoundRobinTracker,
        expected_version: i64,
    ) -> Result<Option<RoundRobinTracker>, ClinicianError> {
        let path = format!("{}?id=eq.{}&version=eq.{}", TRACKER_TABLE, tracker.id, expected_version);
        let body = json!({
            "clinician_order": tracker.clinician_order,
            "current_index": tracker.current_index,
            "last_assigned_clinician_id": tracker.last_assigned_clinician_id,
            "last_assigned_at": tracker.last_assigned_at,
            "version": expected_version + 1,
            "updated_at": Utc::now().to_rfc3339(),
        });

        let rows: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            None,
            Some(body),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(db_error)?;

        first(rows)
    }
}
