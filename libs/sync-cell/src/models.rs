use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crm_cell::CrmContact;
use shared_models::error::SyncError;
use shared_models::sync::CanonicalContact;

// ==============================================================================
// MATCHING
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchAction {
    Create,
    Update,
    /// The stored row already reflects everything the candidate carries.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedBy {
    ClinicId,
    CrmId,
    Phone,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchDecision {
    pub existing: Option<CanonicalContact>,
    pub action: MatchAction,
    pub matched_by: Option<MatchedBy>,
}

impl MatchDecision {
    pub fn create() -> Self {
        Self {
            existing: None,
            action: MatchAction::Create,
            matched_by: None,
        }
    }
}

// ==============================================================================
// DISPATCH
// ==============================================================================

/// One outbound CRM write, addressed by the local row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchJob {
    PushContact(Uuid),
    PushAppointment(Uuid),
}

impl DispatchJob {
    pub fn row_id(&self) -> Uuid {
        match self {
            DispatchJob::PushContact(id) | DispatchJob::PushAppointment(id) => *id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Created { remote_id: String },
    Updated,
    SkippedDuplicate,
    Error(SyncError),
}

impl DispatchOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            DispatchOutcome::Created { .. } => "created",
            DispatchOutcome::Updated => "updated",
            DispatchOutcome::SkippedDuplicate => "skipped-duplicate",
            DispatchOutcome::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub created: usize,
    pub updated: usize,
    pub skipped_duplicate: usize,
    pub errors: usize,
}

impl DispatchStats {
    pub fn record(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Created { .. } => self.created += 1,
            DispatchOutcome::Updated => self.updated += 1,
            DispatchOutcome::SkippedDuplicate => self.skipped_duplicate += 1,
            DispatchOutcome::Error(_) => self.errors += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.skipped_duplicate + self.errors
    }
}

/// Result of an ad-hoc single-record push.
#[derive(Debug, Clone, Serialize)]
pub struct PushResult {
    pub id: Uuid,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PushResult {
    pub fn from_outcome(id: Uuid, outcome: &DispatchOutcome) -> Self {
        let (remote_id, error) = match outcome {
            DispatchOutcome::Created { remote_id } => (Some(remote_id.clone()), None),
            DispatchOutcome::Error(e) => (None, Some(e.to_string())),
            _ => (None, None),
        };
        Self {
            id,
            status: outcome.status(),
            remote_id,
            error,
        }
    }
}

// ==============================================================================
// SYNC CYCLE
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    Patients,
    Appointments,
}

/// Which part of a cycle a trigger asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncScope {
    Patients,
    Appointments,
    Full,
}

/// Structured outcome of one orchestrator pass. Never an `Err`; a failed
/// pass carries its reason in `error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub kind: SyncKind,
    pub success: bool,
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    /// Entries dropped before reconciliation: unreadable, or missing ids or times.
    pub invalid: usize,
    pub dispatched: DispatchStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SyncReport {
    pub fn new(kind: SyncKind) -> Self {
        Self {
            kind,
            success: true,
            fetched: 0,
            created: 0,
            updated: 0,
            skipped: 0,
            invalid: 0,
            dispatched: DispatchStats::default(),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(mut self, error: &SyncError) -> Self {
        self.success = false;
        self.error = Some(error.to_string());
        self.timestamp = Utc::now();
        self
    }
}

// ==============================================================================
// WEBHOOK
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEventType {
    ContactCreate,
    ContactUpdate,
    AppointmentCreate,
    AppointmentUpdate,
}

impl WebhookEventType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ContactCreate" => Some(Self::ContactCreate),
            "ContactUpdate" => Some(Self::ContactUpdate),
            "AppointmentCreate" => Some(Self::AppointmentCreate),
            "AppointmentUpdate" => Some(Self::AppointmentUpdate),
            _ => None,
        }
    }
}

/// Contact events are flat: the contact fields sit next to `type`.
pub type WebhookContact = CrmContact;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAppointment {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub appointment_status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookAppointmentEnvelope {
    #[serde(default)]
    pub appointment: WebhookAppointment,
}

/// Acknowledgement body returned to the CRM.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookAck {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clinic_result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clinic_error: Option<String>,
}

impl WebhookAck {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            clinic_result: None,
            clinic_error: None,
        }
    }

    pub fn with_clinic_result(mut self, result: impl Into<String>) -> Self {
        self.clinic_result = Some(result.into());
        self
    }

    pub fn with_clinic_error(mut self, error: &SyncError) -> Self {
        self.clinic_error = Some(error.to_string());
        self
    }
}
