use std::sync::Arc;
use serde_json::json;

use shared_config::{default_status_map, AppConfig};

pub struct TestConfig {
    pub clinic_base_url: String,
    pub crm_base_url: String,
    pub supabase_url: String,
    pub supabase_service_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            clinic_base_url: "http://localhost:18080".to_string(),
            crm_base_url: "http://localhost:18081".to_string(),
            supabase_url: String::new(),
            supabase_service_key: String::new(),
        }
    }
}

impl TestConfig {
    /// Points both upstream clients at the given mock server base URLs.
    pub fn with_upstreams(clinic_base_url: &str, crm_base_url: &str) -> Self {
        Self {
            clinic_base_url: clinic_base_url.to_string(),
            crm_base_url: crm_base_url.to_string(),
            ..Self::default()
        }
    }

    pub fn with_storage(mut self, supabase_url: &str) -> Self {
        self.supabase_url = supabase_url.to_string();
        self.supabase_service_key = "test-service-key".to_string();
        self
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            clinic_base_url: self.clinic_base_url.clone(),
            clinic_email: "sync@example.com".to_string(),
            clinic_password: "test-password".to_string(),
            clinic_client_id: 5778,
            clinic_event_type_id: 29330,
            clinic_admin_info_id: 5770,

            crm_base_url: self.crm_base_url.clone(),
            crm_authorize_url: format!("{}/oauth/chooselocation", self.crm_base_url),
            crm_client_id: "test-client-id".to_string(),
            crm_client_secret: "test-client-secret".to_string(),
            crm_redirect_uri: "http://localhost:3000/auth/callback".to_string(),
            crm_scope: "contacts.write calendars/events.write".to_string(),
            crm_api_version: "2021-07-28".to_string(),
            crm_calendar_id: "cal-test".to_string(),
            crm_assigned_user_id: "user-test".to_string(),
            crm_status_map: default_status_map(),

            supabase_url: self.supabase_url.clone(),
            supabase_service_key: self.supabase_service_key.clone(),

            sync_batch_size: 1000,
            dispatcher_workers: 4,
            dispatcher_rate_per_second: 1000,
            retry_max_attempts: 3,
            retry_base_delay_ms: 5,
            sync_interval_seconds: 3600,
            crm_refresh_interval_seconds: 72000,
            appointment_lookback_days: 30,
            appointment_lookahead_days: 365,

            server_port: 3000,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

/// Canned upstream bodies shaped like the real Clinic System and CRM responses.
pub struct MockUpstreamResponses;

impl MockUpstreamResponses {
    pub fn clinic_login_response(token: &str) -> serde_json::Value {
        json!({
            "token": token,
            "keys": [{ "key": "crypto-key-1" }],
            "id": "practice-7",
            "exp": 4102444800i64
        })
    }

    pub fn clinic_patient(id: i64, phone: &str) -> serde_json::Value {
        json!({
            "id": id,
            "firstName": "Anna",
            "lastName": "Muster",
            "salutation": "Frau",
            "street": "Bahnhofstrasse 1",
            "zip": "8001",
            "city": "Zürich",
            "birthDate": "07.03.1985",
            "sex": false,
            "phone": phone,
            "email": ""
        })
    }

    pub fn clinic_event(id: i64, patient_id: i64, start_ms: i64, end_ms: i64) -> serde_json::Value {
        json!({
            "id": id,
            "patientId": patient_id,
            "start": start_ms,
            "end": end_ms,
            "status": 2,
            "eventTypeId": 29330,
            "user_id": 0,
            "clientId": 5778,
            "adminInfoId": 5770
        })
    }

    pub fn crm_token_response(access_token: &str, refresh_token: &str) -> serde_json::Value {
        json!({
            "access_token": access_token,
            "refresh_token": refresh_token,
            "expires_in": 86399,
            "scope": "contacts.write calendars/events.write",
            "userType": "Location",
            "companyId": "company-1",
            "userId": "crm-user-1",
            "locationId": "loc-1"
        })
    }

    pub fn crm_contact_response(contact_id: &str) -> serde_json::Value {
        json!({
            "contact": {
                "id": contact_id,
                "locationId": "loc-1"
            }
        })
    }

    pub fn crm_appointment_response(appointment_id: &str) -> serde_json::Value {
        json!({
            "id": appointment_id,
            "calendarId": "cal-test",
            "appointmentStatus": "confirmed"
        })
    }

    pub fn error_response(message: &str) -> serde_json::Value {
        json!({ "message": message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = TestConfig::with_upstreams("http://clinic", "http://crm").to_app_config();

        assert_eq!(config.clinic_base_url, "http://clinic");
        assert_eq!(config.crm_base_url, "http://crm");
        assert!(config.is_clinic_configured());
        assert!(config.is_crm_configured());
        assert!(!config.is_storage_configured());
    }

    #[test]
    fn test_storage_override() {
        let config = TestConfig::default().with_storage("http://db").to_app_config();
        assert!(config.is_storage_configured());
    }
}
