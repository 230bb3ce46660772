use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    /// Display name from token metadata, falling back to the email address.
    pub fn display_name(&self) -> String {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("full_name").or_else(|| m.get("name")))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| self.email.clone())
            .unwrap_or_else(|| self.id.clone())
    }
}

/// The identity on whose behalf a scheduling operation runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub name: String,
    pub role: Option<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: Option<&str>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: role.map(str::to_string),
        }
    }

    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.display_name(),
            role: user.role.clone(),
        }
    }
}
