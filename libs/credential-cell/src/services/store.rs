use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;

use shared_config::AppConfig;
use shared_database::{eq_filter, SupabaseClient};
use shared_models::credentials::{CredentialRecord, UpstreamApi};
use shared_models::error::SyncError;

/// Narrow interface over the single active credential row per upstream API.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, api: UpstreamApi) -> Result<Option<CredentialRecord>, SyncError>;

    /// Upsert: creates the row on first exchange, overwrites it afterwards.
    async fn save(&self, record: CredentialRecord) -> Result<(), SyncError>;

    /// Writes `record` only if the stored access token is still
    /// `expected_token`. Returns `false` when another writer got there first.
    async fn replace_if_current(
        &self,
        expected_token: &str,
        record: CredentialRecord,
    ) -> Result<bool, SyncError>;
}

#[derive(Default)]
pub struct InMemoryCredentialStore {
    records: RwLock<HashMap<UpstreamApi, CredentialRecord>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: CredentialRecord) -> Self {
        let mut records = HashMap::new();
        records.insert(record.api, record);
        Self {
            records: RwLock::new(records),
        }
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get(&self, api: UpstreamApi) -> Result<Option<CredentialRecord>, SyncError> {
        Ok(self.records.read().await.get(&api).cloned())
    }

    async fn save(&self, mut record: CredentialRecord) -> Result<(), SyncError> {
        record.updated_at = Utc::now();
        self.records.write().await.insert(record.api, record);
        Ok(())
    }

    async fn replace_if_current(
        &self,
        expected_token: &str,
        mut record: CredentialRecord,
    ) -> Result<bool, SyncError> {
        let mut records = self.records.write().await;
        let current_matches = records
            .get(&record.api)
            .map(|current| current.access_token == expected_token)
            .unwrap_or(false);

        if !current_matches {
            return Ok(false);
        }

        record.updated_at = Utc::now();
        records.insert(record.api, record);
        Ok(true)
    }
}

/// PostgREST-backed store over the `api_credentials` table (primary key `api`).
pub struct SupabaseCredentialStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseCredentialStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }
}

#[async_trait]
impl CredentialStore for SupabaseCredentialStore {
    async fn get(&self, api: UpstreamApi) -> Result<Option<CredentialRecord>, SyncError> {
        let path = format!("/rest/v1/api_credentials?api={}&limit=1", eq_filter(api.as_str()));
        let rows: Vec<CredentialRecord> = self.supabase.request(Method::GET, &path, None).await?;
        Ok(rows.into_iter().next())
    }

    async fn save(&self, mut record: CredentialRecord) -> Result<(), SyncError> {
        record.updated_at = Utc::now();
        debug!("Upserting {} credentials", record.api.as_str());

        self.supabase
            .execute(
                Method::POST,
                "/rest/v1/api_credentials?on_conflict=api",
                Some(json!(record)),
                Some(SupabaseClient::prefer("resolution=merge-duplicates,return=minimal")),
            )
            .await?;
        Ok(())
    }

    async fn replace_if_current(
        &self,
        expected_token: &str,
        mut record: CredentialRecord,
    ) -> Result<bool, SyncError> {
        record.updated_at = Utc::now();
        let path = format!(
            "/rest/v1/api_credentials?api={}&access_token={}",
            eq_filter(record.api.as_str()),
            eq_filter(expected_token)
        );

        let updated: Vec<CredentialRecord> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(json!(record)),
                Some(SupabaseClient::prefer("return=representation")),
            )
            .await?;

        Ok(!updated.is_empty())
    }
}
