use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use shared_config::AppConfig;
use shared_models::credentials::{CredentialRecord, UpstreamApi};
use shared_models::error::SyncError;

use crate::models::{ClinicLoginRequest, ClinicLoginResponse};
use crate::services::store::CredentialStore;

const LOGIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Email/password login against the Clinic System plus the reactive
/// re-login used after a 401.
pub struct ClinicAuthService {
    config: Arc<AppConfig>,
    http: Client,
    store: Arc<dyn CredentialStore>,
    login_lock: Mutex<()>,
}

impl ClinicAuthService {
    pub fn new(config: Arc<AppConfig>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            config,
            http: Client::new(),
            store,
            login_lock: Mutex::new(()),
        }
    }

    /// Stored credentials, logging in first when none exist yet.
    pub async fn credentials(&self) -> Result<CredentialRecord, SyncError> {
        if let Some(record) = self.store.get(UpstreamApi::Clinic).await? {
            return Ok(record);
        }
        self.refresh_after(None).await
    }

    /// Re-login after `stale_token` was rejected. Callers holding the same
    /// stale token share one login: whoever enters second finds a different
    /// token in the store and reuses it.
    #[instrument(skip_all)]
    pub async fn refresh_after(&self, stale_token: Option<&str>) -> Result<CredentialRecord, SyncError> {
        let _guard = self.login_lock.lock().await;

        if let Some(current) = self.store.get(UpstreamApi::Clinic).await? {
            let still_stale = stale_token.map(|stale| current.access_token == stale).unwrap_or(false);
            if !still_stale {
                debug!("Clinic token already replaced by another caller");
                return Ok(current);
            }
        }

        let fresh = self.login().await?;

        match stale_token {
            Some(stale) => {
                if !self.store.replace_if_current(stale, fresh.clone()).await? {
                    // Lost the race against another process; prefer its token.
                    warn!("Clinic credentials changed during re-login, using stored token");
                    if let Some(current) = self.store.get(UpstreamApi::Clinic).await? {
                        return Ok(current);
                    }
                    self.store.save(fresh.clone()).await?;
                }
            }
            None => self.store.save(fresh.clone()).await?,
        }

        Ok(fresh)
    }

    /// `POST /token` with the configured email and password.
    pub async fn login(&self) -> Result<CredentialRecord, SyncError> {
        if !self.config.is_clinic_configured() {
            return Err(SyncError::NotConfigured("Clinic System credentials are missing".to_string()));
        }

        info!("Authenticating against the Clinic System");

        let url = format!("{}/token", self.config.clinic_base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .timeout(LOGIN_TIMEOUT)
            .json(&ClinicLoginRequest {
                email: &self.config.clinic_email,
                password: &self.config.clinic_password,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::from_status(status.as_u16(), body));
        }

        let login: ClinicLoginResponse = response.json().await?;
        Ok(credential_from_login(login))
    }
}

fn credential_from_login(login: ClinicLoginResponse) -> CredentialRecord {
    let mut record = CredentialRecord::new(UpstreamApi::Clinic, login.token);
    record.crypto_key = login.keys.into_iter().next().map(|k| k.key);
    record.practice_id = login.id.and_then(|id| match id {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    record.expires_at = login.exp.and_then(|exp| DateTime::from_timestamp(exp, 0));
    record
}
