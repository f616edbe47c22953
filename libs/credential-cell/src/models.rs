use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ==============================================================================
// CLINIC SYSTEM LOGIN
// ==============================================================================

#[derive(Debug, Serialize)]
pub struct ClinicLoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClinicCryptoKey {
    pub key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClinicLoginResponse {
    pub token: String,
    #[serde(default)]
    pub keys: Vec<ClinicCryptoKey>,
    /// Practice id; numeric or string depending on the account.
    #[serde(default)]
    pub id: Option<Value>,
    /// Token expiry as epoch seconds.
    #[serde(default)]
    pub exp: Option<i64>,
}

// ==============================================================================
// CRM OAUTH
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrmTokenResponse {
    #[serde(rename = "access_token")]
    pub access_token: String,
    #[serde(rename = "refresh_token", default)]
    pub refresh_token: Option<String>,
    #[serde(rename = "expires_in", default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub user_type: Option<String>,
    #[serde(default)]
    pub company_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub location_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OAuthCallbackQuery {
    pub code: Option<String>,
}

/// Token and location needed for every CRM call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrmAccess {
    pub access_token: String,
    pub location_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RefreshStatus {
    Success,
    Failure,
}

/// Outcome of one CRM token refresh. Refresh never errors out; callers get
/// this instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshReport {
    pub status: RefreshStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl RefreshReport {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: RefreshStatus::Success,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: RefreshStatus::Failure,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RefreshStatus::Success
    }
}
