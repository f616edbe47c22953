use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::{eq_filter, in_filter, SupabaseClient};
use shared_models::error::SyncError;
use shared_models::sync::{CanonicalAppointment, CanonicalContact};
use shared_utils::phone_match_key;

use crate::services::repository::SyncStateRepository;

const CONTACTS: &str = "contact_sync";
const APPOINTMENTS: &str = "appointment_sync";
/// Keeps `in.(...)` filters well inside URL length limits.
const ID_CHUNK: usize = 200;

/// PostgREST-backed repository over `contact_sync` and `appointment_sync`.
/// Each bulk write is a single request and therefore a single transaction.
pub struct SupabaseSyncStateRepository {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseSyncStateRepository {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    async fn select<T: DeserializeOwned>(&self, table: &str, filter: &str) -> Result<Vec<T>, SyncError> {
        let path = format!("/rest/v1/{}?{}", table, filter);
        Ok(self.supabase.request(Method::GET, &path, None).await?)
    }

    async fn select_one<T: DeserializeOwned>(&self, table: &str, filter: &str) -> Result<Option<T>, SyncError> {
        let rows: Vec<T> = self.select(table, &format!("{}&limit=1", filter)).await?;
        Ok(rows.into_iter().next())
    }

    async fn select_in<T: DeserializeOwned>(
        &self,
        table: &str,
        column: &str,
        ids: &[String],
    ) -> Result<Vec<T>, SyncError> {
        let mut rows = Vec::new();
        for chunk in ids.chunks(ID_CHUNK) {
            let mut page: Vec<T> = self.select(table, &format!("{}={}", column, in_filter(chunk))).await?;
            rows.append(&mut page);
        }
        Ok(rows)
    }

    async fn insert<T: Serialize>(&self, table: &str, conflict_column: &str, rows: &[T]) -> Result<usize, SyncError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let path = format!("/rest/v1/{}?on_conflict={}", table, conflict_column);
        let inserted: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                &path,
                Some(serde_json::to_value(rows)?),
                Some(SupabaseClient::prefer("resolution=ignore-duplicates,return=representation")),
            )
            .await?;
        Ok(inserted.len())
    }

    /// Bulk update as an upsert on the primary key.
    async fn upsert<T: Serialize>(&self, table: &str, rows: &[T]) -> Result<(), SyncError> {
        if rows.is_empty() {
            return Ok(());
        }
        let path = format!("/rest/v1/{}?on_conflict=id", table);
        self.supabase
            .execute(
                Method::POST,
                &path,
                Some(serde_json::to_value(rows)?),
                Some(SupabaseClient::prefer("resolution=merge-duplicates,return=minimal")),
            )
            .await?;
        Ok(())
    }

    async fn patch(&self, table: &str, id: Uuid, column: &str, value: &str) -> Result<(), SyncError> {
        let path = format!("/rest/v1/{}?id={}", table, eq_filter(&id.to_string()));
        debug!("Setting {}.{} on {}", table, column, id);

        let mut body = serde_json::Map::new();
        body.insert(column.to_string(), json!(value));
        body.insert("last_synced_at".to_string(), json!(Utc::now()));

        self.supabase
            .execute(
                Method::PATCH,
                &path,
                Some(Value::Object(body)),
                Some(SupabaseClient::prefer("return=minimal")),
            )
            .await?;
        Ok(())
    }
}

/// Stored spellings a Swiss number is commonly found in.
fn phone_variants(phone: &str) -> Vec<String> {
    let mut variants = vec![phone.to_string()];
    if let Some(local) = phone_match_key(phone) {
        let national = local.trim_start_matches('0');
        variants.push(local.clone());
        variants.push(format!("+41{}", national));
        variants.push(format!("0041{}", national));
        variants.push(format!("41{}", national));
    }
    variants.dedup();
    variants
}

fn quoted(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn candidate_filter(phone: Option<&str>, email: Option<&str>) -> Option<String> {
    let mut clauses = Vec::new();
    if let Some(phone) = phone {
        let list: Vec<String> = phone_variants(phone).iter().map(|v| quoted(v)).collect();
        clauses.push(format!("phone.in.({})", list.join(",")));
    }
    if let Some(email) = email {
        clauses.push(format!("email.ilike.{}", quoted(email)));
    }
    if clauses.is_empty() {
        return None;
    }
    Some(format!("or={}", urlencoding::encode(&format!("({})", clauses.join(",")))))
}

#[async_trait]
impl SyncStateRepository for SupabaseSyncStateRepository {
    async fn contact(&self, id: Uuid) -> Result<Option<CanonicalContact>, SyncError> {
        self.select_one(CONTACTS, &format!("id={}", eq_filter(&id.to_string()))).await
    }

    async fn contact_by_crm_id(&self, crm_id: &str) -> Result<Option<CanonicalContact>, SyncError> {
        self.select_one(CONTACTS, &format!("crm_contact_id={}", eq_filter(crm_id))).await
    }

    async fn contacts_by_clinic_ids(&self, clinic_ids: &[String]) -> Result<Vec<CanonicalContact>, SyncError> {
        self.select_in(CONTACTS, "clinic_patient_id", clinic_ids).await
    }

    async fn contacts_without_clinic_id(&self) -> Result<Vec<CanonicalContact>, SyncError> {
        self.select(CONTACTS, "clinic_patient_id=is.null").await
    }

    async fn contact_candidates(
        &self,
        phone: Option<&str>,
        email: Option<&str>,
    ) -> Result<Vec<CanonicalContact>, SyncError> {
        let Some(filter) = candidate_filter(phone, email) else {
            return Ok(Vec::new());
        };
        self.select(CONTACTS, &filter).await
    }

    async fn insert_contacts(&self, rows: &[CanonicalContact]) -> Result<usize, SyncError> {
        self.insert(CONTACTS, "clinic_patient_id", rows).await
    }

    async fn update_contacts(&self, rows: &[CanonicalContact]) -> Result<(), SyncError> {
        self.upsert(CONTACTS, rows).await
    }

    async fn set_contact_crm_id(&self, id: Uuid, crm_id: &str) -> Result<(), SyncError> {
        self.patch(CONTACTS, id, "crm_contact_id", crm_id).await
    }

    async fn set_contact_clinic_id(&self, id: Uuid, clinic_id: &str) -> Result<(), SyncError> {
        self.patch(CONTACTS, id, "clinic_patient_id", clinic_id).await
    }

    async fn appointment(&self, id: Uuid) -> Result<Option<CanonicalAppointment>, SyncError> {
        self.select_one(APPOINTMENTS, &format!("id={}", eq_filter(&id.to_string()))).await
    }

    async fn appointment_by_crm_id(&self, crm_id: &str) -> Result<Option<CanonicalAppointment>, SyncError> {
        self.select_one(APPOINTMENTS, &format!("crm_appointment_id={}", eq_filter(crm_id))).await
    }

    async fn appointments_by_clinic_ids(
        &self,
        clinic_ids: &[String],
    ) -> Result<Vec<CanonicalAppointment>, SyncError> {
        self.select_in(APPOINTMENTS, "clinic_appointment_id", clinic_ids).await
    }

    async fn insert_appointments(&self, rows: &[CanonicalAppointment]) -> Result<usize, SyncError> {
        self.insert(APPOINTMENTS, "clinic_appointment_id", rows).await
    }

    async fn update_appointments(&self, rows: &[CanonicalAppointment]) -> Result<(), SyncError> {
        self.upsert(APPOINTMENTS, rows).await
    }

    async fn set_appointment_crm_id(&self, id: Uuid, crm_id: &str) -> Result<(), SyncError> {
        self.patch(APPOINTMENTS, id, "crm_appointment_id", crm_id).await
    }

    async fn set_appointment_clinic_id(&self, id: Uuid, clinic_id: &str) -> Result<(), SyncError> {
        self.patch(APPOINTMENTS, id, "clinic_appointment_id", clinic_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_variants_cover_common_spellings() {
        let variants = phone_variants("+41 79 123 45 67");
        assert!(variants.contains(&"0791234567".to_string()));
        assert!(variants.contains(&"+41791234567".to_string()));
        assert!(variants.contains(&"0041791234567".to_string()));
    }

    #[test]
    fn test_candidate_filter() {
        assert_eq!(candidate_filter(None, None), None);
        let filter = candidate_filter(None, Some("anna@example.com")).unwrap();
        assert_eq!(filter, format!("or={}", urlencoding::encode("(email.ilike.\"anna@example.com\")")));
    }
}
