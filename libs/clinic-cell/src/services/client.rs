use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use credential_cell::ClinicAuthService;
use shared_config::AppConfig;
use shared_models::credentials::CredentialRecord;
use shared_models::error::SyncError;

use crate::models::{ClinicEvent, ClinicEventPayload, ClinicListing, ClinicPatient, ClinicPatientPayload};

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_LIST_TIMEOUT: Duration = Duration::from_secs(30);

/// Clinic System API client. Every call goes through [`ClinicClient::send`],
/// which replays once after a re-login when the token is rejected.
pub struct ClinicClient {
    config: Arc<AppConfig>,
    http: Client,
    auth: Arc<ClinicAuthService>,
}

impl ClinicClient {
    pub fn new(config: Arc<AppConfig>, auth: Arc<ClinicAuthService>) -> Self {
        Self {
            config,
            http: Client::new(),
            auth,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.clinic_base_url.trim_end_matches('/'), path)
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    /// Sends the request built by `build`; on 401 re-logs in and sends it one
    /// more time. A 401 on the replay is fatal for this call.
    pub(crate) async fn send<F>(&self, build: F) -> Result<Response, SyncError>
    where
        F: Fn() -> RequestBuilder,
    {
        let credentials = self.auth.credentials().await?;
        let response = authorized(build(), &credentials).send().await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return ensure_success(response).await;
        }

        warn!("Clinic System token expired, re-authenticating");
        let fresh = self.auth.refresh_after(Some(&credentials.access_token)).await?;
        let replay = authorized(build(), &fresh).send().await?;

        if replay.status() == StatusCode::UNAUTHORIZED {
            return Err(SyncError::AuthExpired(
                "Clinic System rejected the freshly issued token".to_string(),
            ));
        }

        ensure_success(replay).await
    }

    #[instrument(skip(self))]
    pub async fn list_active_patients(&self) -> Result<ClinicListing<ClinicPatient>, SyncError> {
        let url = self.url("/patients");
        let response = self
            .send(|| self.http.get(&url).query(&[("status", 1)]).timeout(DEFAULT_TIMEOUT))
            .await?;

        let patients = ClinicListing::<ClinicPatient>::from_entries(response.json().await?);
        if patients.invalid > 0 {
            warn!("Dropped {} unreadable Clinic patient entries", patients.invalid);
        }
        info!("Fetched {} active Clinic patients", patients.items.len());
        Ok(patients)
    }

    /// Creates a patient and returns its Clinic id.
    #[instrument(skip_all)]
    pub async fn create_patient(&self, payload: &ClinicPatientPayload) -> Result<String, SyncError> {
        let url = self.url("/patients/request");
        debug!("Creating Clinic patient {} {}", payload.first_name, payload.last_name);

        let response = self
            .send(|| self.http.post(&url).json(payload).timeout(DEFAULT_TIMEOUT))
            .await
            .inspect_err(|e| error!("Clinic patient create failed: {}", e))?;

        let body: Value = response.json().await?;
        id_field(&body, &["id"])
            .ok_or_else(|| SyncError::DataIntegrity(format!("no patient id in Clinic response: {}", body)))
    }

    /// Events between two epoch-millisecond bounds.
    #[instrument(skip(self))]
    pub async fn list_events(&self, from_ms: i64, to_ms: i64) -> Result<ClinicListing<ClinicEvent>, SyncError> {
        let url = self.url("/events/events");
        let response = self
            .send(|| {
                self.http
                    .get(&url)
                    .query(&[("from", from_ms), ("to", to_ms)])
                    .timeout(EVENT_LIST_TIMEOUT)
            })
            .await?;

        let events = ClinicListing::<ClinicEvent>::from_entries(response.json().await?);
        if events.invalid > 0 {
            warn!("Dropped {} unreadable Clinic event entries", events.invalid);
        }
        info!("Fetched {} Clinic events", events.items.len());
        Ok(events)
    }

    /// Creates an event and returns its Clinic id, read from `id` or, failing
    /// that, from the first entry of `events`.
    #[instrument(skip_all, fields(patient_id = payload.patient_id))]
    pub async fn create_event(&self, payload: &ClinicEventPayload) -> Result<String, SyncError> {
        let url = self.url("/events");
        let response = self
            .send(|| {
                self.http
                    .post(&url)
                    .query(&[
                        ("ids", ""),
                        ("isCancelMultiUser", "false"),
                        ("changeSeries", "false"),
                        ("changeAllDescriptions", "false"),
                    ])
                    .json(payload)
                    .timeout(DEFAULT_TIMEOUT)
            })
            .await
            .inspect_err(|e| error!("Clinic event create failed: {}", e))?;

        let body: Value = response.json().await?;
        id_field(&body, &["id"])
            .or_else(|| {
                body.get("events")
                    .and_then(Value::as_array)
                    .and_then(|events| events.first())
                    .and_then(|first| id_field(first, &["id"]))
            })
            .ok_or_else(|| SyncError::DataIntegrity(format!("no event id in Clinic response: {}", body)))
    }
}

fn authorized(builder: RequestBuilder, credentials: &CredentialRecord) -> RequestBuilder {
    builder
        .bearer_auth(&credentials.access_token)
        .header("X-CRYPTO-KEY", credentials.crypto_key.as_deref().unwrap_or_default())
}

async fn ensure_success(response: Response) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    error!("Clinic System returned {}: {}", status, body);
    Err(SyncError::from_status(status.as_u16(), body))
}

/// First present id-like field, rendered as a string.
pub(crate) fn id_field(body: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match body.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
