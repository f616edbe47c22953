use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, instrument, warn};

use shared_models::error::SyncError;
use shared_utils::utc_to_epoch_ms;

use crate::models::{
    ClinicInvoice, ClinicInvoicePayload, InvoiceAttributes, InvoiceLookup, InvoicePrescription, InvoiceStati,
};
use crate::services::client::{id_field, ClinicClient, DEFAULT_TIMEOUT};

impl ClinicClient {
    /// Open invoice for `patient_id` covering `appointment_start`, creating one
    /// when none exists. `None` means no invoice could be found or created;
    /// callers treat that as a hard failure for event creation.
    #[instrument(skip(self))]
    pub async fn get_or_create_open_invoice(
        &self,
        patient_id: &str,
        appointment_start: DateTime<Utc>,
    ) -> Option<i64> {
        let invoice_date = invoice_date(appointment_start);
        let invoice_date_ms = utc_to_epoch_ms(invoice_date);

        match self.lookup_open_invoices(patient_id, Some(invoice_date_ms)).await {
            Ok(Some(lookup)) => {
                if let Some(id) = select_open_invoice(&lookup, true) {
                    info!("Found open invoice {} for patient {}", id, patient_id);
                    return Some(id);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Invoice lookup with date filter failed: {}", e),
        }

        match self.lookup_open_invoices(patient_id, None).await {
            Ok(Some(lookup)) => {
                if let Some(id) = select_open_invoice(&lookup, false) {
                    info!("Found open invoice {} for patient {} without date filter", id, patient_id);
                    return Some(id);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Invoice lookup without date filter failed: {}", e),
        }

        warn!("No open invoice for patient {}, attempting to create one", patient_id);
        match self.create_invoice(patient_id, invoice_date).await {
            Ok(id) => id,
            Err(e) => {
                warn!("Invoice creation for patient {} failed: {}", patient_id, e);
                None
            }
        }
    }

    async fn lookup_open_invoices(
        &self,
        patient_id: &str,
        date_ms: Option<i64>,
    ) -> Result<Option<InvoiceLookup>, SyncError> {
        let url = self.url(&format!("/invoices/patients/{}", patient_id));
        let response = self
            .send(|| {
                let request = self.http().get(&url).query(&[("open", "true")]).timeout(DEFAULT_TIMEOUT);
                match date_ms {
                    Some(ms) => request.query(&[("date", ms)]),
                    None => request,
                }
            })
            .await?;

        let body: Value = response.json().await?;
        if body.is_null() {
            return Ok(None);
        }
        Ok(serde_json::from_value(body).ok())
    }

    /// Fallback only. These payload defaults are unverified against the Clinic System.
    async fn create_invoice(&self, patient_id: &str, invoice_date: DateTime<Utc>) -> Result<Option<i64>, SyncError> {
        let patient_id: i64 = patient_id
            .parse()
            .map_err(|_| SyncError::DataIntegrity(format!("non-numeric Clinic patient id {}", patient_id)))?;

        let payload = ClinicInvoicePayload {
            user_id: 0,
            patient_id,
            date_date: invoice_date.format("%Y-%m-%dT%H:%M:%S.000Z").to_string(),
            admin_info_id: self.config().clinic_admin_info_id,
            attributes: InvoiceAttributes {
                date: utc_to_epoch_ms(invoice_date),
                law: "kvg",
                treatment_cause: "disease",
                is_tiers_payant: true,
                vat: false,
            },
            prescription: InvoicePrescription {
                sessions: 9,
                first_session: 1,
            },
            stati: InvoiceStati {
                status: Some(0),
                status_detail: Some(0),
            },
        };

        let url = self.url("/invoices");
        let response = self
            .send(|| self.http().post(&url).json(&payload).timeout(DEFAULT_TIMEOUT))
            .await?;

        let body: Value = response.json().await?;
        let id = id_field(&body, &["id", "invoice"]).and_then(|id| id.parse().ok());
        if id.is_none() {
            warn!("No invoice id in Clinic response: {}", body);
        }
        Ok(id)
    }
}

/// Invoices are dated 18:30 UTC on the appointment's UTC calendar day.
pub fn invoice_date(appointment_start: DateTime<Utc>) -> DateTime<Utc> {
    appointment_start
        .date_naive()
        .and_hms_opt(18, 30, 0)
        .map(|evening| evening.and_utc())
        .unwrap_or(appointment_start)
}

/// Picks an invoice from a lookup. The dated lookup prefers status 0 with
/// detail 0, then any status 0, then the first entry; the undated one skips
/// the detail check.
pub fn select_open_invoice(lookup: &InvoiceLookup, prefer_fully_open: bool) -> Option<i64> {
    let invoices: &[ClinicInvoice] = match lookup {
        InvoiceLookup::One(invoice) => return Some(invoice.id),
        InvoiceLookup::Many(invoices) => invoices,
    };

    let fully_open = if prefer_fully_open {
        invoices
            .iter()
            .find(|inv| inv.status() == Some(0) && inv.status_detail() == Some(0))
    } else {
        None
    };

    fully_open
        .or_else(|| invoices.iter().find(|inv| inv.status() == Some(0)))
        .or_else(|| invoices.first())
        .map(|inv| inv.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn invoice(id: i64, status: i64, detail: i64) -> ClinicInvoice {
        ClinicInvoice {
            id,
            stati: Some(InvoiceStati {
                status: Some(status),
                status_detail: Some(detail),
            }),
        }
    }

    #[test]
    fn test_selection_order() {
        let lookup = InvoiceLookup::Many(vec![invoice(1, 2, 0), invoice(2, 0, 3), invoice(3, 0, 0)]);
        assert_eq!(select_open_invoice(&lookup, true), Some(3));
        assert_eq!(select_open_invoice(&lookup, false), Some(2));

        let closed = InvoiceLookup::Many(vec![invoice(7, 2, 1), invoice(8, 3, 0)]);
        assert_eq!(select_open_invoice(&closed, true), Some(7));

        assert_eq!(select_open_invoice(&InvoiceLookup::Many(vec![]), true), None);
        assert_eq!(select_open_invoice(&InvoiceLookup::One(invoice(9, 5, 5)), true), Some(9));
    }

    #[test]
    fn test_invoice_date_is_evening_of_appointment_day() {
        let start = Utc.with_ymd_and_hms(2025, 10, 1, 8, 15, 0).unwrap();
        assert_eq!(invoice_date(start), Utc.with_ymd_and_hms(2025, 10, 1, 18, 30, 0).unwrap());
    }
}
