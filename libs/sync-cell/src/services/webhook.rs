use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use clinic_cell::ClinicClient;
use crm_cell::CrmGateway;
use shared_config::AppConfig;
use shared_models::error::{AppError, SyncError};
use shared_models::sync::{CanonicalAppointment, CanonicalContact, RecordSource};

use crate::models::{MatchAction, WebhookAck, WebhookAppointmentEnvelope, WebhookContact, WebhookEventType};
use crate::services::repository::SyncStateRepository;
use crate::services::{mapper, matching};

/// Point-in-time reconciliation for CRM push events.
///
/// Malformed events are rejected with 400. Once the local row is persisted,
/// Clinic System failures are reported in the ack instead of failing the
/// request, so the CRM does not redeliver an event we already recorded.
pub struct WebhookIngestor {
    config: Arc<AppConfig>,
    clinic: Arc<ClinicClient>,
    crm: Arc<dyn CrmGateway>,
    repository: Arc<dyn SyncStateRepository>,
}

impl WebhookIngestor {
    pub fn new(
        config: Arc<AppConfig>,
        clinic: Arc<ClinicClient>,
        crm: Arc<dyn CrmGateway>,
        repository: Arc<dyn SyncStateRepository>,
    ) -> Self {
        Self {
            config,
            clinic,
            crm,
            repository,
        }
    }

    #[instrument(skip_all)]
    pub async fn handle(&self, event: Value) -> Result<WebhookAck, AppError> {
        let event_type = event
            .get("type")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or_else(|| AppError::BadRequest("Missing event type".to_string()))?;

        info!("Received CRM webhook {}", event_type);

        match WebhookEventType::parse(&event_type) {
            Some(WebhookEventType::ContactCreate | WebhookEventType::ContactUpdate) => {
                let contact: WebhookContact = serde_json::from_value(event)
                    .map_err(|e| AppError::BadRequest(format!("Invalid contact payload: {}", e)))?;
                self.handle_contact(contact).await
            }
            Some(WebhookEventType::AppointmentCreate | WebhookEventType::AppointmentUpdate) => {
                let envelope: WebhookAppointmentEnvelope = serde_json::from_value(event)
                    .map_err(|e| AppError::BadRequest(format!("Invalid appointment payload: {}", e)))?;
                self.handle_appointment(envelope).await
            }
            None => {
                info!("Ignoring CRM webhook type {}", event_type);
                Ok(WebhookAck::new("ignored"))
            }
        }
    }

    async fn handle_contact(&self, contact: WebhookContact) -> Result<WebhookAck, AppError> {
        let Some(contact_id) = contact.id.clone().filter(|id| !id.is_empty()) else {
            return Err(AppError::BadRequest("Missing contact ID".to_string()));
        };
        let contact = self.hydrate_contact(&contact_id, contact).await;

        let candidate = mapper::contact_from_crm(&contact);
        let row = self.reconcile_contact(&candidate).await?;

        let mut ack = WebhookAck::new("contact synced");
        if row.clinic_patient_id.is_none() {
            ack = match self.link_clinic_patient(&row).await {
                Ok(result) => ack.with_clinic_result(result),
                Err(e) => {
                    error!("Could not link contact row {} to a Clinic patient: {}", row.id, e);
                    ack.with_clinic_error(&e)
                }
            };
        }
        Ok(ack)
    }

    /// Update events may carry only the changed fields. Without a phone or
    /// email there is nothing to match on, so the full contact is fetched.
    async fn hydrate_contact(&self, contact_id: &str, contact: WebhookContact) -> WebhookContact {
        if contact.phone.is_some() || contact.email.is_some() {
            return contact;
        }

        match self.crm.get_contact(contact_id).await {
            Ok(mut full) => {
                full.id = Some(contact_id.to_string());
                full
            }
            Err(e) => {
                warn!("Could not fetch CRM contact {}, using event fields: {}", contact_id, e);
                contact
            }
        }
    }

    /// Matches the candidate against stored rows and persists the result.
    async fn reconcile_contact(&self, candidate: &CanonicalContact) -> Result<CanonicalContact, SyncError> {
        let mut pool = self
            .repository
            .contact_candidates(candidate.phone.as_deref(), candidate.email.as_deref())
            .await?;
        if let Some(crm_id) = &candidate.crm_contact_id {
            if let Some(row) = self.repository.contact_by_crm_id(crm_id).await? {
                if !pool.iter().any(|r| r.id == row.id) {
                    pool.push(row);
                }
            }
        }

        let decision = matching::resolve(candidate, &pool);
        match (decision.action, decision.existing) {
            (MatchAction::Skip, Some(existing)) => Ok(existing),
            (MatchAction::Update, Some(existing)) => {
                let merged = matching::merge_candidate(&existing, candidate);
                self.repository.update_contacts(std::slice::from_ref(&merged)).await?;
                info!("Updated contact row {} from CRM ({:?})", merged.id, decision.matched_by);
                Ok(merged)
            }
            _ => {
                let inserted = self
                    .repository
                    .insert_contacts(std::slice::from_ref(candidate))
                    .await?;
                if inserted == 0 {
                    return Err(SyncError::DuplicateConflict(format!(
                        "contact {:?} was stored concurrently",
                        candidate.crm_contact_id
                    )));
                }
                info!("Created contact row {} from CRM", candidate.id);
                Ok(candidate.clone())
            }
        }
    }

    /// Links the row to an active Clinic patient with the same phone, or
    /// creates the patient.
    async fn link_clinic_patient(&self, row: &CanonicalContact) -> Result<&'static str, SyncError> {
        if let Some(phone) = row.phone.as_deref() {
            let patients = self.clinic.list_active_patients().await?;
            if let Some(patient) = matching::find_patient_by_phone(phone, &patients.items) {
                self.repository.set_contact_clinic_id(row.id, &patient.id).await?;
                info!("Linked contact row {} to Clinic patient {}", row.id, patient.id);
                return Ok("linked");
            }
        }

        let patient_id = self
            .clinic
            .create_patient(&mapper::clinic_patient_payload(row))
            .await?;
        self.repository.set_contact_clinic_id(row.id, &patient_id).await?;
        info!("Created Clinic patient {} for contact row {}", patient_id, row.id);
        Ok("created")
    }

    async fn handle_appointment(&self, envelope: WebhookAppointmentEnvelope) -> Result<WebhookAck, AppError> {
        let event = envelope.appointment;
        let (Some(crm_id), Some(contact_id)) = (
            event.id.filter(|id| !id.is_empty()),
            event.contact_id.filter(|id| !id.is_empty()),
        ) else {
            return Err(AppError::BadRequest("Missing appointment or contact ID".to_string()));
        };

        let (Some(start), Some(end)) = (
            event.start_time.as_deref().and_then(parse_time),
            event.end_time.as_deref().and_then(parse_time),
        ) else {
            return Err(AppError::BadRequest("Invalid start/end time".to_string()));
        };

        if self.repository.appointment_by_crm_id(&crm_id).await?.is_some() {
            return Ok(WebhookAck::new("already exists"));
        }

        let Some(clinic_patient_id) = self
            .repository
            .contact_by_crm_id(&contact_id)
            .await?
            .and_then(|contact| contact.clinic_patient_id)
        else {
            warn!("CRM appointment {} references contact {} without a Clinic patient", crm_id, contact_id);
            return Ok(WebhookAck::new("skipped: contact not synced to Clinic System"));
        };

        let mut appointment = CanonicalAppointment::new(clinic_patient_id, start, end, RecordSource::Crm);
        appointment.crm_appointment_id = Some(crm_id.clone());
        appointment.crm_contact_id = Some(contact_id);
        appointment.status = event.appointment_status.filter(|s| !s.is_empty());

        if self
            .repository
            .insert_appointments(std::slice::from_ref(&appointment))
            .await?
            == 0
        {
            return Ok(WebhookAck::new("already exists"));
        }

        let ack = WebhookAck::new("appointment created");
        Ok(match self.create_clinic_event(&appointment).await {
            Ok(event_id) => ack.with_clinic_result(format!("created event {}", event_id)),
            Err(e) => {
                error!("Clinic event for CRM appointment {} failed: {}", crm_id, e);
                ack.with_clinic_error(&e)
            }
        })
    }

    async fn create_clinic_event(&self, appointment: &CanonicalAppointment) -> Result<String, SyncError> {
        let invoice_id = self
            .clinic
            .get_or_create_open_invoice(&appointment.clinic_patient_id, appointment.start_time)
            .await
            .ok_or_else(|| {
                SyncError::DataIntegrity(format!(
                    "no open invoice for Clinic patient {}",
                    appointment.clinic_patient_id
                ))
            })?;

        let payload = mapper::clinic_event_payload(appointment, invoice_id, &self.config)?;
        let event_id = self.clinic.create_event(&payload).await?;
        self.repository
            .set_appointment_clinic_id(appointment.id, &event_id)
            .await?;
        Ok(event_id)
    }
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
