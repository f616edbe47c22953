use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamApi {
    Clinic,
    Crm,
}

impl UpstreamApi {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamApi::Clinic => "clinic",
            UpstreamApi::Crm => "crm",
        }
    }
}

/// The single active credential set for one upstream API. Updated in place on
/// every login or refresh, never deleted by the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialRecord {
    pub api: UpstreamApi,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub crypto_key: Option<String>,
    pub practice_id: Option<String>,
    pub location_id: Option<String>,
    pub company_id: Option<String>,
    pub user_id: Option<String>,
    pub user_type: Option<String>,
    pub scope: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl CredentialRecord {
    pub fn new(api: UpstreamApi, access_token: impl Into<String>) -> Self {
        Self {
            api,
            access_token: access_token.into(),
            refresh_token: None,
            crypto_key: None,
            practice_id: None,
            location_id: None,
            company_id: None,
            user_id: None,
            user_type: None,
            scope: None,
            expires_at: None,
            updated_at: Utc::now(),
        }
    }
}
