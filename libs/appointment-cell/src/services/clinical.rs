use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use shared_config::AppConfig;

use crate::models::{Appointment, Scenario};

/// Payload for `POST /encounters` on the clinical service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EncounterRequest {
    pub patient_id: String,
    pub patient_chi: Option<String>,
    pub hospital_id: String,
    pub department_id: Option<String>,
    pub encounter_type: String,
    pub admitting_doctor_id: Option<String>,
    pub admission_date: DateTime<Utc>,
    pub chief_complaint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DischargeRequest {
    pub encounter_id: String,
    pub patient_id: String,
    pub patient_chi: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Encounter {
    pub id: String,
}

#[async_trait]
pub trait ClinicalService: Send + Sync {
    async fn create_encounter(&self, request: &EncounterRequest) -> Result<Encounter>;
    async fn create_discharge(&self, request: &DischargeRequest) -> Result<()>;
}

pub struct ClinicalServiceClient {
    client: Client,
    base_url: String,
}

impl ClinicalServiceClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.clinical_service_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Clinical service error ({}) on {}: {}", status, path, text));
        }
        Ok(response)
    }
}

#[async_trait]
impl ClinicalService for ClinicalServiceClient {
    async fn create_encounter(&self, request: &EncounterRequest) -> Result<Encounter> {
        let response = self.post("/encounters", request).await?;
        Ok(response.json::<Encounter>().await?)
    }

    async fn create_discharge(&self, request: &DischargeRequest) -> Result<()> {
        self.post("/discharge", request).await?;
        Ok(())
    }
}

/// Used when no clinical service is configured.
pub struct NoopClinicalService;

#[async_trait]
impl ClinicalService for NoopClinicalService {
    async fn create_encounter(&self, request: &EncounterRequest) -> Result<Encounter> {
        debug!("Clinical service not configured; skipping encounter for {}", request.patient_id);
        Ok(Encounter { id: String::new() })
    }

    async fn create_discharge(&self, _request: &DischargeRequest) -> Result<()> {
        Ok(())
    }
}

/// Records every call; optionally fails them all.
#[derive(Default)]
pub struct RecordingClinicalService {
    encounters: Mutex<Vec<EncounterRequest>>,
    discharges: Mutex<Vec<DischargeRequest>>,
    fail: bool,
}

impl RecordingClinicalService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn encounters(&self) -> Vec<EncounterRequest> {
        self.encounters.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn discharges(&self) -> Vec<DischargeRequest> {
        self.discharges.lock().map(|d| d.clone()).unwrap_or_default()
    }

    /// Yield until `count` encounters have been requested or the budget runs out.
    pub async fn wait_for_encounters(&self, count: usize) -> Vec<EncounterRequest> {
        for _ in 0..100 {
            if self.encounters().len() >= count {
                break;
            }
            tokio::task::yield_now().await;
        }
        self.encounters()
    }
}

#[async_trait]
impl ClinicalService for RecordingClinicalService {
    async fn create_encounter(&self, request: &EncounterRequest) -> Result<Encounter> {
        let id = match self.encounters.lock() {
            Ok(mut encounters) => {
                encounters.push(request.clone());
                format!("enc-{}", encounters.len())
            },
            Err(_) => String::new(),
        };
        if self.fail {
            return Err(anyhow!("clinical service unavailable"));
        }
        Ok(Encounter { id })
    }

    async fn create_discharge(&self, request: &DischargeRequest) -> Result<()> {
        if let Ok(mut discharges) = self.discharges.lock() {
            discharges.push(request.clone());
        }
        if self.fail {
            return Err(anyhow!("clinical service unavailable"));
        }
        Ok(())
    }
}

/// Work to run once a transition has committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    OpenEncounter { discharge: bool },
}

/// Runs follow-ups in the background. Failures go to the log only.
#[derive(Clone)]
pub struct ClinicalDispatcher {
    clinical: Arc<dyn ClinicalService>,
}

impl ClinicalDispatcher {
    pub fn new(clinical: Arc<dyn ClinicalService>) -> Self {
        Self { clinical }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        if config.is_clinical_service_configured() {
            Self::new(Arc::new(ClinicalServiceClient::new(config)))
        } else {
            Self::new(Arc::new(NoopClinicalService))
        }
    }

    pub fn dispatch(&self, appointment: &Appointment, follow_ups: Vec<FollowUp>) {
        if follow_ups.is_empty() {
            return;
        }

        let clinical = Arc::clone(&self.clinical);
        let appointment = appointment.clone();
        tokio::spawn(async move {
            for follow_up in follow_ups {
                if let Err(e) = run(clinical.as_ref(), &appointment, follow_up).await {
                    warn!(
                        appointment_id = %appointment.id,
                        "Follow-up {:?} failed: {}", follow_up, e
                    );
                }
            }
        });
    }
}

async fn run(clinical: &dyn ClinicalService, appointment: &Appointment, follow_up: FollowUp) -> Result<()> {
    let FollowUp::OpenEncounter { discharge } = follow_up;
    let Some(patient_id) = appointment.patient_id.clone() else {
        return Ok(());
    };

    let encounter_type = match appointment.scenario {
        Scenario::Emergency => "emergency",
        Scenario::WalkIn | Scenario::Scheduled => "outpatient",
    };

    let encounter = clinical.create_encounter(&EncounterRequest {
        patient_id: patient_id.clone(),
        patient_chi: appointment.patient_chi.clone(),
        hospital_id: appointment.hospital_id.clone(),
        department_id: appointment.department_id.clone(),
        encounter_type: encounter_type.to_string(),
        admitting_doctor_id: appointment.doctor_id.clone(),
        admission_date: Utc::now(),
        chief_complaint: appointment.reason.clone(),
    }).await?;
    info!("Opened encounter {} for appointment {}", encounter.id, appointment.id);

    if discharge {
        clinical.create_discharge(&DischargeRequest {
            encounter_id: encounter.id,
            patient_id,
            patient_chi: appointment.patient_chi.clone(),
        }).await?;
    }

    Ok(())
}
