use serde::de::DeserializeOwned;
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ==============================================================================
// INBOUND (Clinic System responses)
// ==============================================================================

/// A Clinic list response. Entries that do not deserialize are dropped and
/// counted instead of failing the whole listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ClinicListing<T> {
    pub items: Vec<T>,
    pub invalid: usize,
}

impl<T: DeserializeOwned> ClinicListing<T> {
    pub fn from_entries(entries: Vec<Value>) -> Self {
        let mut items = Vec::with_capacity(entries.len());
        let mut invalid = 0;
        for entry in entries {
            match serde_json::from_value(entry) {
                Ok(item) => items.push(item),
                Err(_) => invalid += 1,
            }
        }
        Self { items, invalid }
    }

    /// Entries in the response, readable or not.
    pub fn total(&self) -> usize {
        self.items.len() + self.invalid
    }
}

/// One entry of `GET /patients?status=1`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClinicPatient {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub salutation: Option<String>,
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    /// `DD.MM.YYYY`.
    #[serde(default)]
    pub birth_date: Option<String>,
    #[serde(default)]
    pub sex: Option<bool>,
}

/// One entry of `GET /events/events`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClinicEvent {
    #[serde(default, deserialize_with = "opt_id_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub patient_id: Option<String>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub start: Option<i64>,
    #[serde(default)]
    pub end: Option<i64>,
    #[serde(default)]
    pub status: Option<Value>,
    #[serde(default)]
    pub event_type_id: Option<i64>,
    #[serde(rename = "user_id", default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub client_id: Option<i64>,
    #[serde(default)]
    pub admin_info_id: Option<i64>,
}

impl ClinicEvent {
    /// Status code as free text; numbers and strings are both seen upstream.
    pub fn status_code(&self) -> Option<String> {
        match self.status.as_ref()? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceStati {
    #[serde(default)]
    pub status: Option<i64>,
    #[serde(default)]
    pub status_detail: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ClinicInvoice {
    pub id: i64,
    #[serde(default)]
    pub stati: Option<InvoiceStati>,
}

impl ClinicInvoice {
    pub fn status(&self) -> Option<i64> {
        self.stati.as_ref().and_then(|s| s.status)
    }

    pub fn status_detail(&self) -> Option<i64> {
        self.stati.as_ref().and_then(|s| s.status_detail)
    }
}

/// The open-invoice lookup answers either with a list or a single object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum InvoiceLookup {
    Many(Vec<ClinicInvoice>),
    One(ClinicInvoice),
}

// ==============================================================================
// OUTBOUND (Clinic System requests)
// ==============================================================================

/// Body of `POST /patients/request`. Every field is mandatory upstream.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClinicPatientPayload {
    pub first_name: String,
    pub last_name: String,
    pub street: String,
    pub zip: String,
    pub city: String,
    /// `YYYY-MM-DD`.
    pub birth_date: String,
    /// `m` or `f`.
    pub sex: String,
    pub status: i64,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub has_email_consent: bool,
    pub comment: String,
}

/// Body of `POST /events`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClinicEventPayload {
    #[serde(rename = "user_id")]
    pub user_id: i64,
    pub patient_id: i64,
    pub event_type_id: i64,
    pub client_id: i64,
    pub admin_info_id: i64,
    pub has_presence_admin_info: bool,
    /// Epoch milliseconds.
    pub start: i64,
    pub end: i64,
    /// `%Y-%m-%dT%H:%M:%S.000Z`, UTC.
    pub start_date: String,
    pub end_date: String,
    pub start_date_hours: String,
    pub start_date_minutes: String,
    pub end_date_hours: String,
    pub end_date_minutes: String,
    pub resource_ids: Vec<String>,
    pub send_reminder: bool,
    pub has_sms_reminder: bool,
    pub is_serial_event: bool,
    pub new_patient: bool,
    pub reminder_sent: bool,
    pub has_validation_errors: bool,
    pub event_metadata: Value,
    pub status: i64,
    pub invoice_id: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceAttributes {
    pub date: i64,
    pub law: &'static str,
    pub treatment_cause: &'static str,
    pub is_tiers_payant: bool,
    pub vat: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoicePrescription {
    pub sessions: i64,
    pub first_session: i64,
}

/// Body of `POST /invoices`. The upstream contract is undocumented; these
/// values are the best known working guess and may be rejected.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClinicInvoicePayload {
    #[serde(rename = "user_id")]
    pub user_id: i64,
    pub patient_id: i64,
    pub date_date: String,
    pub admin_info_id: i64,
    pub attributes: InvoiceAttributes,
    pub prescription: InvoicePrescription,
    pub stati: InvoiceStati,
}

fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    opt_id_string(deserializer)?.ok_or_else(|| de::Error::custom("missing id"))
}

fn opt_id_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(de::Error::custom(format!("unexpected id value: {}", other))),
    }
}
