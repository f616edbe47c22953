use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use tracing::{debug, error, info, instrument};

use credential_cell::{CrmAccess, CrmOAuthService};
use shared_config::AppConfig;
use shared_models::error::SyncError;

use crate::models::{CrmAppointmentPayload, CrmContact, CrmContactPayload};
use crate::services::gateway::CrmGateway;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const APPOINTMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// CRM REST client. Each call is a single HTTP attempt; retries belong to the
/// caller so that every attempt can be rate limited.
pub struct CrmClient {
    config: Arc<AppConfig>,
    http: Client,
    oauth: Arc<CrmOAuthService>,
}

impl CrmClient {
    pub fn new(config: Arc<AppConfig>, oauth: Arc<CrmOAuthService>) -> Self {
        Self {
            config,
            http: Client::new(),
            oauth,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.crm_base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, builder: RequestBuilder, access: &CrmAccess) -> RequestBuilder {
        builder
            .bearer_auth(&access.access_token)
            .header("Version", &self.config.crm_api_version)
            .header("Accept", "application/json")
    }

    async fn post_json(&self, path: &str, body: &Value, timeout: Duration) -> Result<Value, SyncError> {
        let access = self.oauth.access().await?;
        let url = self.url(path);
        let response = self
            .authorized(self.http.post(&url), &access)
            .json(body)
            .timeout(timeout)
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }
}

#[async_trait]
impl CrmGateway for CrmClient {
    #[instrument(skip_all)]
    async fn create_contact(&self, payload: &CrmContactPayload) -> Result<String, SyncError> {
        let access = self.oauth.access().await?;
        let mut payload = payload.clone();
        payload.location_id = Some(access.location_id);
        let body = serde_json::to_value(&payload)?;

        let created = self
            .post_json("/contacts/", &body, DEFAULT_TIMEOUT)
            .await
            .inspect_err(|e| error!("CRM contact create failed: {} (payload: {})", e, body))?;

        let id = nested_id(&created, "contact")
            .ok_or_else(|| SyncError::DataIntegrity(format!("no contact id in CRM response: {}", created)))?;
        info!("Created CRM contact {}", id);
        Ok(id)
    }

    #[instrument(skip(self, payload))]
    async fn update_contact(&self, contact_id: &str, payload: &CrmContactPayload) -> Result<(), SyncError> {
        let mut payload = payload.clone();
        payload.location_id = None;
        let access = self.oauth.access().await?;
        let url = self.url(&format!("/contacts/{}", contact_id));

        let response = self
            .authorized(self.http.put(&url), &access)
            .json(&payload)
            .timeout(DEFAULT_TIMEOUT)
            .send()
            .await?;
        ensure_success(response)
            .await
            .inspect_err(|e| error!("CRM contact {} update failed: {}", contact_id, e))?;

        debug!("Updated CRM contact {}", contact_id);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_contact(&self, contact_id: &str) -> Result<CrmContact, SyncError> {
        let access = self.oauth.access().await?;
        let url = self.url(&format!("/contacts/{}", contact_id));

        let response = self
            .authorized(self.http.get(&url), &access)
            .timeout(DEFAULT_TIMEOUT)
            .send()
            .await?;
        let body: Value = ensure_success(response).await?.json().await?;

        let contact = body.get("contact").cloned().unwrap_or(body);
        Ok(serde_json::from_value(contact)?)
    }

    #[instrument(skip_all, fields(contact_id = %payload.contact_id))]
    async fn create_appointment(&self, payload: &CrmAppointmentPayload) -> Result<String, SyncError> {
        let access = self.oauth.access().await?;
        let mut payload = payload.clone();
        payload.location_id = Some(access.location_id);
        let body = serde_json::to_value(&payload)?;

        let created = self
            .post_json("/calendars/events/appointments", &body, APPOINTMENT_TIMEOUT)
            .await
            .inspect_err(|e| error!("CRM appointment create failed: {} (payload: {})", e, body))?;

        let id = nested_id(&created, "appointment")
            .ok_or_else(|| SyncError::DataIntegrity(format!("no appointment id in CRM response: {}", created)))?;
        info!("Created CRM appointment {}", id);
        Ok(id)
    }
}

async fn ensure_success(response: Response) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(SyncError::from_status(status.as_u16(), error_message(&body)))
}

/// CRM error bodies carry the reason in `message`, either a string or a list.
fn error_message(body: &str) -> String {
    let Ok(json) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };
    match json.get("message") {
        Some(Value::String(message)) => message.clone(),
        Some(Value::Array(messages)) => messages
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("; "),
        _ => body.to_string(),
    }
}

/// `{wrapper: {id}}` or a bare `{id}`.
fn nested_id(body: &Value, wrapper: &str) -> Option<String> {
    body.get(wrapper)
        .and_then(|inner| inner.get("id"))
        .or_else(|| body.get("id"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
