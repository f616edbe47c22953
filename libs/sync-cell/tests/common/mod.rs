#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use wiremock::MockServer;

use clinic_cell::ClinicClient;
use credential_cell::{ClinicAuthService, InMemoryCredentialStore};
use crm_cell::{CrmAppointmentPayload, CrmContact, CrmContactPayload, CrmGateway};
use shared_config::AppConfig;
use shared_models::credentials::{CredentialRecord, UpstreamApi};
use shared_models::error::SyncError;
use shared_utils::test_utils::TestConfig;

/// In-process CRM that records calls and hands out ids.
#[derive(Default)]
pub struct FakeCrm {
    pub contacts_created: AtomicUsize,
    pub contacts_updated: AtomicUsize,
    pub appointments_created: AtomicUsize,
    pub contacts_fetched: AtomicUsize,
    ids: Mutex<VecDeque<String>>,
    remote: Mutex<HashMap<String, CrmContact>>,
    failure: Option<SyncError>,
}

impl FakeCrm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids returned by the next creates, in order.
    pub fn with_ids(ids: &[&str]) -> Self {
        Self {
            ids: Mutex::new(ids.iter().map(|id| id.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn failing(error: SyncError) -> Self {
        Self {
            failure: Some(error),
            ..Self::default()
        }
    }

    /// Contact served by `get_contact`.
    pub fn with_remote_contact(self, contact: CrmContact) -> Self {
        if let Some(id) = contact.id.clone() {
            self.remote.lock().unwrap().insert(id, contact);
        }
        self
    }

    fn next_id(&self, prefix: &str, counter: &AtomicUsize) -> Result<String, SyncError> {
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        let n = counter.fetch_add(1, Ordering::SeqCst);
        let queued = self.ids.lock().unwrap().pop_front();
        Ok(queued.unwrap_or_else(|| format!("{}-{}", prefix, n)))
    }
}

#[async_trait]
impl CrmGateway for FakeCrm {
    async fn create_contact(&self, _payload: &CrmContactPayload) -> Result<String, SyncError> {
        self.next_id("crm-contact", &self.contacts_created)
    }

    async fn update_contact(&self, _contact_id: &str, _payload: &CrmContactPayload) -> Result<(), SyncError> {
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        self.contacts_updated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_contact(&self, contact_id: &str) -> Result<CrmContact, SyncError> {
        self.contacts_fetched.fetch_add(1, Ordering::SeqCst);
        self.remote
            .lock()
            .unwrap()
            .get(contact_id)
            .cloned()
            .ok_or_else(|| SyncError::from_status(404, "Contact not found"))
    }

    async fn create_appointment(&self, _payload: &CrmAppointmentPayload) -> Result<String, SyncError> {
        self.next_id("crm-appointment", &self.appointments_created)
    }
}

pub fn test_config(clinic: &MockServer) -> Arc<AppConfig> {
    TestConfig::with_upstreams(&clinic.uri(), "http://crm.invalid").to_arc()
}

/// Clinic client with a stored, valid login so no `/token` call is needed.
pub fn clinic_client(config: Arc<AppConfig>) -> Arc<ClinicClient> {
    let mut record = CredentialRecord::new(UpstreamApi::Clinic, "clinic-token");
    record.crypto_key = Some("crypto-key-1".to_string());

    let store = Arc::new(InMemoryCredentialStore::with_record(record));
    let auth = Arc::new(ClinicAuthService::new(config.clone(), store));
    Arc::new(ClinicClient::new(config, auth))
}
