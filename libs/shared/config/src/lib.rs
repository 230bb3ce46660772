use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub identity_service_url: String,
    pub clinical_service_url: String,
    pub redis_url: Option<String>,
    pub audit_stream_key: String,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            identity_service_url: env::var("IDENTITY_SERVICE_URL")
                .unwrap_or_else(|_| {
                    warn!("IDENTITY_SERVICE_URL not set, round-robin rosters will stay empty");
                    String::new()
                }),
            clinical_service_url: env::var("CLINICAL_SERVICE_URL")
                .unwrap_or_else(|_| {
                    warn!("CLINICAL_SERVICE_URL not set, encounter creation disabled");
                    String::new()
                }),
            redis_url: env::var("REDIS_URL").ok(),
            audit_stream_key: env::var("AUDIT_STREAM_KEY")
                .unwrap_or_else(|_| "audit:events".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - falling back to in-memory scheduling stores");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    pub fn is_identity_service_configured(&self) -> bool {
        !self.identity_service_url.is_empty()
    }

    pub fn is_clinical_service_configured(&self) -> bool {
        !self.clinical_service_url.is_empty()
    }
}

/// Tunables for the scheduling core.
#[derive(Debug, Clone)]
pub struct SchedulingConfig {
    pub default_duration_minutes: i32,
    pub default_page_size: u32,
    pub max_page_size: u32,
    /// Attempts at a conditional write before giving up with a contention error.
    pub max_write_attempts: u32,
    pub clinician_roles: Vec<String>,
    pub admin_roles: Vec<String>,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            default_duration_minutes: 30,
            default_page_size: 20,
            max_page_size: 100,
            max_write_attempts: 5,
            clinician_roles: vec![
                "doctor".to_string(),
                "nurse".to_string(),
                "clinician".to_string(),
            ],
            admin_roles: vec![
                "admin".to_string(),
                "super_admin".to_string(),
                "hospital_admin".to_string(),
            ],
        }
    }
}

impl SchedulingConfig {
    pub fn is_clinician_role(&self, role: Option<&str>) -> bool {
        role.map(|r| self.clinician_roles.iter().any(|c| c == r))
            .unwrap_or(false)
    }

    pub fn is_admin_role(&self, role: Option<&str>) -> bool {
        role.map(|r| self.admin_roles.iter().any(|a| a == r))
            .unwrap_or(false)
    }
}
