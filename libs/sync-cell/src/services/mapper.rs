//! Pure translations between canonical rows and each upstream schema.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;

use clinic_cell::{ClinicEvent, ClinicEventPayload, ClinicPatient, ClinicPatientPayload};
use crm_cell::{CrmAppointmentPayload, CrmContact, CrmContactPayload};
use shared_config::AppConfig;
use shared_models::error::SyncError;
use shared_models::sync::{CanonicalAppointment, CanonicalContact, RecordSource};
use shared_utils::{birth_date_to_iso, epoch_ms_to_utc, iso_to_birth_date, utc_to_epoch_ms, validate_and_clean_phone};

pub const DEFAULT_CRM_STATUS: &str = "confirmed";

const PLACEHOLDER_FIRST_NAME: &str = "Unknown";
const PLACEHOLDER_LAST_NAME: &str = "Patient";
const PLACEHOLDER_STREET: &str = "Unknown";
const PLACEHOLDER_ZIP: &str = "0000";
const PLACEHOLDER_CITY: &str = "Unknown";
const PLACEHOLDER_BIRTH_DATE: &str = "1990-01-01";
const ACTIVE_PATIENT_STATUS: i64 = 1;
/// Status the Clinic System assigns to bookings entered through its own UI.
const BOOKED_EVENT_STATUS: i64 = 5;

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// ==============================================================================
// INBOUND
// ==============================================================================

pub fn contact_from_clinic(patient: &ClinicPatient) -> CanonicalContact {
    let mut contact = CanonicalContact::new(RecordSource::Clinic);
    contact.clinic_patient_id = Some(patient.id.clone());
    contact.email = non_empty(patient.email.as_deref());
    contact.phone = non_empty(patient.phone.as_deref());
    contact.first_name = non_empty(patient.first_name.as_deref());
    contact.last_name = non_empty(patient.last_name.as_deref());
    contact.salutation = non_empty(patient.salutation.as_deref());
    contact.street = non_empty(patient.street.as_deref());
    contact.zip = non_empty(patient.zip.as_deref());
    contact.city = non_empty(patient.city.as_deref());
    contact.birth_date = non_empty(patient.birth_date.as_deref());
    contact.sex = patient.sex;
    contact
}

pub fn contact_from_crm(crm: &CrmContact) -> CanonicalContact {
    let mut contact = CanonicalContact::new(RecordSource::Crm);
    contact.crm_contact_id = non_empty(crm.id.as_deref());
    contact.email = non_empty(crm.email.as_deref());
    contact.phone = non_empty(crm.phone.as_deref());
    contact.first_name = non_empty(crm.first_name.as_deref());
    contact.last_name = non_empty(crm.last_name.as_deref());
    contact.street = non_empty(crm.address1.as_deref());
    contact.zip = non_empty(crm.postal_code.as_deref());
    contact.city = non_empty(crm.city.as_deref());
    contact.birth_date = crm.date_of_birth.as_deref().and_then(iso_to_birth_date);
    contact
}

/// `None` when the event lacks its id, patient or either bound.
pub fn appointment_from_clinic(event: &ClinicEvent) -> Option<CanonicalAppointment> {
    let clinic_id = event.id.clone()?;
    let patient_id = event.patient_id.clone()?;
    let start = epoch_ms_to_utc(event.start?)?;
    let end = epoch_ms_to_utc(event.end?)?;

    let mut appointment = CanonicalAppointment::new(patient_id, start, end, RecordSource::Clinic);
    appointment.clinic_appointment_id = Some(clinic_id);
    appointment.status = event.status_code();
    appointment.event_type_id = event.event_type_id;
    appointment.user_id = event.user_id;
    appointment.client_id = event.client_id;
    appointment.admin_info_id = event.admin_info_id;
    Some(appointment)
}

// ==============================================================================
// OUTBOUND: CRM
// ==============================================================================

pub fn crm_contact_payload(contact: &CanonicalContact) -> CrmContactPayload {
    let first_name = contact.first_name.clone().unwrap_or_default();
    let last_name = contact.last_name.clone().unwrap_or_default();
    let full_name = contact.full_name();

    CrmContactPayload {
        first_name,
        last_name,
        name: if full_name.is_empty() { "Unknown".to_string() } else { full_name },
        email: contact.email.clone(),
        phone: contact.phone.as_deref().and_then(validate_and_clean_phone),
        address1: contact.street.clone(),
        city: contact.city.clone(),
        postal_code: contact.zip.clone(),
        date_of_birth: contact.birth_date.as_deref().and_then(birth_date_to_iso),
        location_id: None,
    }
}

pub fn crm_status(code: Option<&str>, status_map: &HashMap<String, String>) -> String {
    code.and_then(|code| status_map.get(code))
        .cloned()
        .unwrap_or_else(|| DEFAULT_CRM_STATUS.to_string())
}

/// Fails with `DataIntegrity` while the appointment has no CRM contact.
pub fn crm_appointment_payload(
    appointment: &CanonicalAppointment,
    config: &AppConfig,
) -> Result<CrmAppointmentPayload, SyncError> {
    let contact_id = appointment.crm_contact_id.clone().ok_or_else(|| {
        SyncError::DataIntegrity(format!(
            "appointment {} has no CRM contact (patient {})",
            appointment.id, appointment.clinic_patient_id
        ))
    })?;

    let title = match &appointment.clinic_appointment_id {
        Some(id) => format!("Physio Appointment #{}", id),
        None => "Physio Appointment".to_string(),
    };

    Ok(CrmAppointmentPayload {
        title,
        meeting_location_type: "custom".to_string(),
        meeting_location_id: "custom_0".to_string(),
        override_location_config: true,
        appointment_status: crm_status(appointment.status.as_deref(), &config.crm_status_map),
        assigned_user_id: config.crm_assigned_user_id.clone(),
        description: format!(
            "Physiotherapy appointment for patient {}",
            appointment.clinic_patient_id
        ),
        address: "Zoom".to_string(),
        ignore_date_range: false,
        to_notify: false,
        ignore_free_slot_validation: true,
        calendar_id: config.crm_calendar_id.clone(),
        location_id: None,
        contact_id,
        start_time: rfc3339(appointment.start_time),
        end_time: rfc3339(appointment.end_time),
    })
}

fn rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, false)
}

// ==============================================================================
// OUTBOUND: CLINIC
// ==============================================================================

pub fn clinic_patient_payload(contact: &CanonicalContact) -> ClinicPatientPayload {
    let or = |value: &Option<String>, fallback: &str| value.clone().unwrap_or_else(|| fallback.to_string());

    ClinicPatientPayload {
        first_name: or(&contact.first_name, PLACEHOLDER_FIRST_NAME),
        last_name: or(&contact.last_name, PLACEHOLDER_LAST_NAME),
        street: or(&contact.street, PLACEHOLDER_STREET),
        zip: or(&contact.zip, PLACEHOLDER_ZIP),
        city: or(&contact.city, PLACEHOLDER_CITY),
        birth_date: contact
            .birth_date
            .as_deref()
            .and_then(birth_date_to_iso)
            .unwrap_or_else(|| PLACEHOLDER_BIRTH_DATE.to_string()),
        sex: match contact.sex {
            Some(false) => "f",
            Some(true) | None => "m",
        }
        .to_string(),
        status: ACTIVE_PATIENT_STATUS,
        phone: contact.phone.clone(),
        email: contact.email.clone(),
        has_email_consent: true,
        comment: "Created from CRM".to_string(),
    }
}

/// Event body for a CRM-born appointment. Times are sent in UTC.
pub fn clinic_event_payload(
    appointment: &CanonicalAppointment,
    invoice_id: i64,
    config: &AppConfig,
) -> Result<ClinicEventPayload, SyncError> {
    let patient_id: i64 = appointment.clinic_patient_id.parse().map_err(|_| {
        SyncError::DataIntegrity(format!(
            "non-numeric Clinic patient id {}",
            appointment.clinic_patient_id
        ))
    })?;

    let (start, end) = (appointment.start_time, appointment.end_time);

    Ok(ClinicEventPayload {
        user_id: 0,
        patient_id,
        event_type_id: config.clinic_event_type_id,
        client_id: config.clinic_client_id,
        admin_info_id: config.clinic_admin_info_id,
        has_presence_admin_info: false,
        start: utc_to_epoch_ms(start),
        end: utc_to_epoch_ms(end),
        start_date: start.format("%Y-%m-%dT%H:%M:%S.000Z").to_string(),
        end_date: end.format("%Y-%m-%dT%H:%M:%S.000Z").to_string(),
        start_date_hours: start.format("%H").to_string(),
        start_date_minutes: start.format("%M").to_string(),
        end_date_hours: end.format("%H").to_string(),
        end_date_minutes: end.format("%M").to_string(),
        resource_ids: vec![format!("c-{}", config.clinic_client_id)],
        send_reminder: false,
        has_sms_reminder: false,
        is_serial_event: false,
        new_patient: false,
        reminder_sent: false,
        has_validation_errors: false,
        event_metadata: json!({}),
        status: BOOKED_EVENT_STATUS,
        invoice_id,
    })
}
