use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which upstream system a canonical row was first seen in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    Clinic,
    Crm,
}

/// Sync-state row for one real-world person.
///
/// `clinic_patient_id` and `crm_contact_id` are each unique when present; a
/// row may carry neither, one, or both while the two sides converge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalContact {
    pub id: Uuid,
    pub clinic_patient_id: Option<String>,
    pub crm_contact_id: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub salutation: Option<String>,
    pub street: Option<String>,
    pub zip: Option<String>,
    pub city: Option<String>,
    /// Clinic source format `DD.MM.YYYY`.
    pub birth_date: Option<String>,
    pub sex: Option<bool>,
    pub source: RecordSource,
    pub last_synced_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl CanonicalContact {
    pub fn new(source: RecordSource) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            clinic_patient_id: None,
            crm_contact_id: None,
            email: None,
            phone: None,
            first_name: None,
            last_name: None,
            salutation: None,
            street: None,
            zip: None,
            city: None,
            birth_date: None,
            sex: None,
            source,
            last_synced_at: now,
            created_at: now,
        }
    }

    pub fn full_name(&self) -> String {
        format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or_default(),
            self.last_name.as_deref().unwrap_or_default()
        )
        .trim()
        .to_string()
    }
}

/// Sync-state row for one appointment. Always tied to a clinic patient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalAppointment {
    pub id: Uuid,
    pub clinic_appointment_id: Option<String>,
    pub crm_appointment_id: Option<String>,
    pub clinic_patient_id: String,
    /// Copied from the linked contact once it has one.
    pub crm_contact_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: Option<String>,
    pub event_type_id: Option<i64>,
    pub user_id: Option<i64>,
    pub client_id: Option<i64>,
    pub admin_info_id: Option<i64>,
    pub source: RecordSource,
    pub last_synced_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl CanonicalAppointment {
    pub fn new(
        clinic_patient_id: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        source: RecordSource,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            clinic_appointment_id: None,
            crm_appointment_id: None,
            clinic_patient_id: clinic_patient_id.into(),
            crm_contact_id: None,
            start_time,
            end_time,
            status: None,
            event_type_id: None,
            user_id: None,
            client_id: None,
            admin_info_id: None,
            source,
            last_synced_at: now,
            created_at: now,
        }
    }

    /// Missing on the CRM side but pushable there.
    pub fn awaits_crm_push(&self) -> bool {
        self.crm_appointment_id.is_none() && self.crm_contact_id.is_some()
    }
}
