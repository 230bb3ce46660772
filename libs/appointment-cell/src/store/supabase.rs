use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::{SupabaseClient, SupabaseError};

use crate::models::{
    Appointment, AppointmentError, AppointmentFilter, AppointmentStatus, PageRequest,
    RescheduleRequest, Sort,
};
use crate::store::{AppointmentStore, RescheduleRequestStore};

const APPOINTMENTS_TABLE: &str = "/rest/v1/appointments";
const REQUESTS_TABLE: &str = "/rest/v1/reschedule_requests";

fn eq(value: &str) -> String {
    format!("eq.{}", urlencoding::encode(value))
}

fn timestamp(value: DateTime<Utc>) -> String {
    urlencoding::encode(&value.to_rfc3339()).into_owned()
}

fn db_error(e: anyhow::Error) -> AppointmentError {
    AppointmentError::Database(e.to_string())
}

fn parse_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, AppointmentError> {
    rows.into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| AppointmentError::Database(format!("Failed to parse row: {}", e)))
}

fn first<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Option<T>, AppointmentError> {
    Ok(parse_rows(rows)?.into_iter().next())
}

/// Row body for a conditional update: everything but the key, with the bumped version.
fn update_body<T: Serialize>(row: &T, expected_version: i64) -> Result<Value, AppointmentError> {
    let mut body = serde_json::to_value(row)
        .map_err(|e| AppointmentError::Database(format!("Failed to encode row: {}", e)))?;
    if let Some(fields) = body.as_object_mut() {
        fields.remove("id");
        fields.remove("created_at");
        fields.insert("version".to_string(), Value::from(expected_version + 1));
        fields.insert("updated_at".to_string(), Value::from(Utc::now().to_rfc3339()));
    }
    Ok(body)
}

fn status_list(statuses: &[AppointmentStatus]) -> String {
    statuses.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(",")
}

/// PostgREST query fragments for a filter.
fn filter_query(filter: &AppointmentFilter) -> Vec<String> {
    let mut parts = Vec::new();
    if let Some(doctor_id) = &filter.doctor_id {
        parts.push(format!("doctor_id={}", eq(doctor_id)));
    }
    if let Some(patient_id) = &filter.patient_id {
        parts.push(format!("patient_id={}", eq(patient_id)));
    }
    if let Some(hospital_id) = &filter.hospital_id {
        parts.push(format!("hospital_id={}", eq(hospital_id)));
    }
    if !filter.statuses.is_empty() {
        parts.push(format!("status=in.({})", status_list(&filter.statuses)));
    }
    if let Some(appointment_type) = filter.appointment_type {
        parts.push(format!("appointment_type=eq.{}", appointment_type));
    }
    if let Some(scenario) = filter.scenario {
        parts.push(format!("scenario=eq.{}", scenario));
    }
    if let Some(from) = filter.date_from {
        parts.push(format!("scheduled_date=gte.{}", timestamp(from)));
    }
    if let Some(to) = filter.date_to {
        parts.push(format!("scheduled_date=lt.{}", timestamp(to)));
    }
    parts
}

pub struct SupabaseAppointmentStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseAppointmentStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn select(&self, query: &[String]) -> Result<Vec<Value>, AppointmentError> {
        let path = if query.is_empty() {
            APPOINTMENTS_TABLE.to_string()
        } else {
            format!("{}?{}", APPOINTMENTS_TABLE, query.join("&"))
        };
        self.supabase.request(Method::GET, &path, None, None)
            .await
            .map_err(db_error)
    }
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn insert(&self, appointment: &Appointment) -> Result<Appointment, AppointmentError> {
        let body = serde_json::to_value(appointment)
            .map_err(|e| AppointmentError::Database(format!("Failed to encode appointment: {}", e)))?;

        let result: anyhow::Result<Vec<Value>> = self.supabase.request_with_headers(
            Method::POST,
            APPOINTMENTS_TABLE,
            None,
            Some(body),
            Some(SupabaseClient::return_representation()),
        ).await;

        match result {
            Ok(rows) => first(rows)?.ok_or_else(|| {
                AppointmentError::Database("Insert returned no appointment row".to_string())
            }),
            // Partial unique index on (patient_id, scheduled_date) for live rows
            Err(e) if SupabaseError::is_conflict(&e) => Err(AppointmentError::Conflict(format!(
                "Patient already has a live appointment at {}",
                appointment.scheduled_date
            ))),
            Err(e) => Err(db_error(e)),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        let rows = self.select(&[format!("id=eq.{}", id)]).await?;
        first(rows)
    }

    async fn compare_and_swap(
        &self,
        appointment: &Appointment,
        expected_version: i64,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let path = format!(
            "{}?id=eq.{}&version=eq.{}",
            APPOINTMENTS_TABLE, appointment.id, expected_version
        );
        let rows: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            None,
            Some(update_body(appointment, expected_version)?),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(db_error)?;

        if rows.is_empty() {
            debug!("Appointment {} changed since version {}", appointment.id, expected_version);
        }
        first(rows)
    }

    async fn find_live_at(
        &self,
        patient_id: &str,
        scheduled_date: DateTime<Utc>,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let rows = self.select(&[
            format!("patient_id={}", eq(patient_id)),
            format!("scheduled_date=eq.{}", timestamp(scheduled_date)),
            format!("status=not.in.({})", status_list(&AppointmentStatus::FINISHED)),
            "limit=1".to_string(),
        ]).await?;
        first(rows)
    }

    async fn search(
        &self,
        filter: &AppointmentFilter,
        sort: Sort,
        page: PageRequest,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut query = filter_query(filter);
        query.push(format!("order={}.{}", sort.field.column(), sort.order.as_postgrest()));
        query.push(format!("limit={}", page.limit));
        query.push(format!("offset={}", page.offset()));

        parse_rows(self.select(&query).await?)
    }

    async fn count(&self, filter: &AppointmentFilter) -> Result<usize, AppointmentError> {
        let mut query = filter_query(filter);
        query.push("select=id".to_string());
        Ok(self.select(&query).await?.len())
    }

    async fn pending_queue(&self, hospital_id: Option<&str>) -> Result<Vec<Appointment>, AppointmentError> {
        let mut query = vec!["status=eq.pending_acceptance".to_string()];
        if let Some(hospital_id) = hospital_id {
            query.push(format!("hospital_id={}", eq(hospital_id)));
        }
        query.push("order=created_at.asc".to_string());

        parse_rows(self.select(&query).await?)
    }
}

pub struct SupabaseRescheduleRequestStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseRescheduleRequestStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn select(&self, query: &str) -> Result<Vec<RescheduleRequest>, AppointmentError> {
        let path = format!("{}?{}", REQUESTS_TABLE, query);
        let rows: Vec<Value> = self.supabase.request(Method::GET, &path, None, None)
            .await
            .map_err(db_error)?;
        parse_rows(rows)
    }
}

#[async_trait]
impl RescheduleRequestStore for SupabaseRescheduleRequestStore {
    async fn insert(&self, request: &RescheduleRequest) -> Result<RescheduleRequest, AppointmentError> {
        let body = serde_json::to_value(request)
            .map_err(|e| AppointmentError::Database(format!("Failed to encode request: {}", e)))?;

        let rows: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            REQUESTS_TABLE,
            None,
            Some(body),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(db_error)?;

        first(rows)?.ok_or_else(|| {
            AppointmentError::Database("Insert returned no reschedule request row".to_string())
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<RescheduleRequest>, AppointmentError> {
        Ok(self.select(&format!("id=eq.{}", id)).await?.into_iter().next())
    }

    async fn compare_and_swap(
        &self,
        request: &RescheduleRequest,
        expected_version: i64,
    ) -> Result<Option<RescheduleRequest>, AppointmentError> {
        let path = format!("{}?id=eq.{}&version=eq.{}", REQUESTS_TABLE, request.id, expected_version);
        let rows: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            None,
            Some(update_body(request, expected_version)?),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(db_error)?;

        first(rows)
    }

    async fn pending(&self) -> Result<Vec<RescheduleRequest>, AppointmentError> {
        self.select("status=eq.pending&order=created_at.asc").await
    }

    async fn for_appointment(&self, appointment_id: Uuid) -> Result<Vec<RescheduleRequest>, AppointmentError> {
        self.select(&format!("appointment_id=eq.{}&order=created_at.asc", appointment_id)).await
    }
}
