use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Client;
use tracing::{error, info, instrument, warn};

use shared_config::AppConfig;
use shared_models::credentials::{CredentialRecord, UpstreamApi};
use shared_models::error::SyncError;

use crate::models::{CrmAccess, CrmTokenResponse, RefreshReport};
use crate::services::store::CredentialStore;

const TOKEN_TIMEOUT: Duration = Duration::from_secs(10);

/// CRM OAuth2: authorization-code exchange, refresh-token exchange and access
/// lookup for the CRM client.
pub struct CrmOAuthService {
    config: Arc<AppConfig>,
    http: Client,
    store: Arc<dyn CredentialStore>,
}

impl CrmOAuthService {
    pub fn new(config: Arc<AppConfig>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            config,
            http: Client::new(),
            store,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_crm_configured()
    }

    /// Location chooser URL the operator is redirected to.
    pub fn authorize_url(&self) -> String {
        format!(
            "{}?response_type=code&redirect_uri={}&client_id={}&scope={}",
            self.config.crm_authorize_url,
            urlencoding::encode(&self.config.crm_redirect_uri),
            urlencoding::encode(&self.config.crm_client_id),
            urlencoding::encode(&self.config.crm_scope),
        )
    }

    /// Exchanges an authorization code and stores the resulting credential.
    #[instrument(skip_all)]
    pub async fn exchange_code(&self, code: &str) -> Result<CredentialRecord, SyncError> {
        if !self.is_configured() {
            return Err(SyncError::NotConfigured("CRM OAuth client is not configured".to_string()));
        }

        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.crm_client_id.as_str()),
            ("client_secret", self.config.crm_client_secret.as_str()),
            ("redirect_uri", self.config.crm_redirect_uri.as_str()),
            ("code", code),
        ];

        let tokens = self.post_token_form(&form).await?;

        let mut record = CredentialRecord::new(UpstreamApi::Crm, tokens.access_token.clone());
        apply_token_response(&mut record, tokens);
        self.store.save(record.clone()).await?;

        info!(
            "CRM OAuth exchange stored credentials for location {}",
            record.location_id.as_deref().unwrap_or("unknown")
        );
        Ok(record)
    }

    /// Refresh-token exchange. Never fails: problems are returned in the report
    /// and later CRM calls keep failing unauthorized until the operator
    /// reconnects.
    #[instrument(skip_all)]
    pub async fn refresh(&self) -> RefreshReport {
        let current = match self.store.get(UpstreamApi::Crm).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                error!("No CRM credentials found. Please authenticate first.");
                return RefreshReport::failure("No authentication credentials found");
            }
            Err(e) => return RefreshReport::failure(format!("Credential store error: {}", e)),
        };

        let Some(refresh_token) = current.refresh_token.clone() else {
            error!("No CRM refresh token available. Please re-authenticate manually.");
            return RefreshReport::failure("No refresh token available");
        };

        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.config.crm_client_id.as_str()),
            ("client_secret", self.config.crm_client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
        ];

        info!("Refreshing CRM access token");
        let tokens = match self.post_token_form(&form).await {
            Ok(tokens) => tokens,
            Err(e) => {
                error!("Failed to refresh CRM token: {}", e);
                return RefreshReport::failure(format!("Token refresh failed: {}", e));
            }
        };

        let mut updated = current.clone();
        updated.access_token = tokens.access_token.clone();
        apply_token_response(&mut updated, tokens);

        match self.store.replace_if_current(&current.access_token, updated).await {
            Ok(true) => {
                info!("CRM token refreshed successfully");
                RefreshReport::success("Token refreshed successfully")
            }
            Ok(false) => {
                warn!("CRM credentials changed while refreshing, keeping the newer row");
                RefreshReport::success("Token already refreshed by another caller")
            }
            Err(e) => RefreshReport::failure(format!("Credential store error: {}", e)),
        }
    }

    /// Token and location for a CRM call.
    pub async fn access(&self) -> Result<CrmAccess, SyncError> {
        let record = self.store.get(UpstreamApi::Crm).await?.ok_or_else(|| {
            SyncError::NotConfigured("CRM credentials not available, complete the OAuth connect flow".to_string())
        })?;

        let location_id = record
            .location_id
            .ok_or_else(|| SyncError::NotConfigured("CRM location id is missing, please re-authenticate".to_string()))?;

        Ok(CrmAccess {
            access_token: record.access_token,
            location_id,
        })
    }

    async fn post_token_form(&self, form: &[(&str, &str)]) -> Result<CrmTokenResponse, SyncError> {
        let url = format!("{}/oauth/token", self.config.crm_base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .timeout(TOKEN_TIMEOUT)
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::from_status(status.as_u16(), body));
        }

        Ok(response.json().await?)
    }
}

/// Folds a token response into `record`. Absent optional fields keep their
/// stored values, including the refresh token.
fn apply_token_response(record: &mut CredentialRecord, tokens: CrmTokenResponse) {
    if let Some(refresh_token) = tokens.refresh_token {
        record.refresh_token = Some(refresh_token);
    }
    if let Some(expires_in) = tokens.expires_in {
        record.expires_at = Some(Utc::now() + ChronoDuration::seconds(expires_in));
    }
    if tokens.scope.is_some() {
        record.scope = tokens.scope;
    }
    if tokens.user_type.is_some() {
        record.user_type = tokens.user_type;
    }
    if tokens.company_id.is_some() {
        record.company_id = tokens.company_id;
    }
    if tokens.user_id.is_some() {
        record.user_id = tokens.user_id;
    }
    if tokens.location_id.is_some() {
        record.location_id = tokens.location_id;
    }
}
