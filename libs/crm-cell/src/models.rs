use serde::{Deserialize, Serialize};

/// Body of `POST /contacts/` and `PUT /contacts/{id}`. Absent values are left
/// out entirely; the CRM rejects explicit nulls on some fields.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CrmContactPayload {
    pub first_name: String,
    pub last_name: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    /// `YYYY-MM-DD`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    /// Filled in by the client on create, never sent on update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
}

/// Body of `POST /calendars/events/appointments`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CrmAppointmentPayload {
    pub title: String,
    pub meeting_location_type: String,
    pub meeting_location_id: String,
    pub override_location_config: bool,
    pub appointment_status: String,
    pub assigned_user_id: String,
    pub description: String,
    pub address: String,
    pub ignore_date_range: bool,
    pub to_notify: bool,
    pub ignore_free_slot_validation: bool,
    pub calendar_id: String,
    /// Filled in by the client from the stored credential.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
    pub contact_id: String,
    /// RFC 3339.
    pub start_time: String,
    pub end_time: String,
}

/// Contact fields as `GET /contacts/{id}` returns them and contact webhooks
/// push them.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CrmContact {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub address1: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<String>,
}
