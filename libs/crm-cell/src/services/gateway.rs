use async_trait::async_trait;

use shared_models::error::SyncError;

use crate::models::{CrmAppointmentPayload, CrmContact, CrmContactPayload};

/// Outbound CRM operations the sync engine depends on.
#[async_trait]
pub trait CrmGateway: Send + Sync {
    /// Creates a contact and returns its CRM id.
    async fn create_contact(&self, payload: &CrmContactPayload) -> Result<String, SyncError>;

    async fn update_contact(&self, contact_id: &str, payload: &CrmContactPayload) -> Result<(), SyncError>;

    async fn get_contact(&self, contact_id: &str) -> Result<CrmContact, SyncError>;

    /// Creates an appointment and returns its CRM id.
    async fn create_appointment(&self, payload: &CrmAppointmentPayload) -> Result<String, SyncError>;
}
