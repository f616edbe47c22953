use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use tracing::warn;

pub const DEFAULT_CLINIC_BASE_URL: &str = "https://ehealth.pharmedsolutions.ch/api/1.0";
pub const DEFAULT_CRM_BASE_URL: &str = "https://services.leadconnectorhq.com";
pub const DEFAULT_CRM_AUTHORIZE_URL: &str = "https://marketplace.gohighlevel.com/oauth/chooselocation";
pub const DEFAULT_CRM_API_VERSION: &str = "2021-07-28";

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Clinic System
    pub clinic_base_url: String,
    pub clinic_email: String,
    pub clinic_password: String,
    pub clinic_client_id: i64,
    pub clinic_event_type_id: i64,
    pub clinic_admin_info_id: i64,

    // CRM
    pub crm_base_url: String,
    pub crm_authorize_url: String,
    pub crm_client_id: String,
    pub crm_client_secret: String,
    pub crm_redirect_uri: String,
    pub crm_scope: String,
    pub crm_api_version: String,
    pub crm_calendar_id: String,
    pub crm_assigned_user_id: String,
    pub crm_status_map: HashMap<String, String>,

    // Sync-state storage (PostgREST). Empty url keeps state in memory.
    pub supabase_url: String,
    pub supabase_service_key: String,

    // Sync tuning
    pub sync_batch_size: usize,
    pub dispatcher_workers: usize,
    pub dispatcher_rate_per_second: usize,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub sync_interval_seconds: u64,
    pub crm_refresh_interval_seconds: u64,
    pub appointment_lookback_days: i64,
    pub appointment_lookahead_days: i64,

    pub server_port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            clinic_base_url: env_or("CLINIC_BASE_URL", DEFAULT_CLINIC_BASE_URL),
            clinic_email: env_required("CLINIC_EMAIL"),
            clinic_password: env_required("CLINIC_PASSWORD"),
            clinic_client_id: env_parse("CLINIC_CLIENT_ID", 5778),
            clinic_event_type_id: env_parse("CLINIC_EVENT_TYPE_ID", 29330),
            clinic_admin_info_id: env_parse("CLINIC_ADMIN_INFO_ID", 5770),

            crm_base_url: env_or("CRM_BASE_URL", DEFAULT_CRM_BASE_URL),
            crm_authorize_url: env_or("CRM_AUTHORIZE_URL", DEFAULT_CRM_AUTHORIZE_URL),
            crm_client_id: env_required("CRM_CLIENT_ID"),
            crm_client_secret: env_required("CRM_CLIENT_SECRET"),
            crm_redirect_uri: env_required("CRM_REDIRECT_URI"),
            crm_scope: env_required("CRM_SCOPE"),
            crm_api_version: env_or("CRM_API_VERSION", DEFAULT_CRM_API_VERSION),
            crm_calendar_id: env_required("CRM_CALENDAR_ID"),
            crm_assigned_user_id: env_required("CRM_ASSIGNED_USER_ID"),
            crm_status_map: env::var("CRM_STATUS_MAP")
                .map(|raw| parse_status_map(&raw))
                .unwrap_or_else(|_| default_status_map()),

            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, sync state will be kept in memory");
                    String::new()
                }),
            supabase_service_key: env::var("SUPABASE_SERVICE_KEY").unwrap_or_default(),

            sync_batch_size: env_parse("SYNC_BATCH_SIZE", 1000),
            dispatcher_workers: env_parse("DISPATCHER_WORKERS", 8),
            dispatcher_rate_per_second: env_parse("DISPATCHER_RATE_PER_SECOND", 10),
            retry_max_attempts: env_parse("RETRY_MAX_ATTEMPTS", 3),
            retry_base_delay_ms: env_parse("RETRY_BASE_DELAY_MS", 2000),
            sync_interval_seconds: env_parse("SYNC_INTERVAL_SECONDS", 3600),
            crm_refresh_interval_seconds: env_parse("CRM_REFRESH_INTERVAL_SECONDS", 20 * 3600),
            appointment_lookback_days: env_parse("APPOINTMENT_LOOKBACK_DAYS", 30),
            appointment_lookahead_days: env_parse("APPOINTMENT_LOOKAHEAD_DAYS", 365),

            server_port: env_parse("PORT", 3000),
        };

        if !config.is_clinic_configured() {
            warn!("Clinic System credentials missing - patient and appointment pulls will fail");
        }
        if !config.is_crm_configured() {
            warn!("CRM OAuth client not configured - pushes to CRM are disabled until configured");
        }

        config
    }

    pub fn is_clinic_configured(&self) -> bool {
        !self.clinic_base_url.is_empty()
            && !self.clinic_email.is_empty()
            && !self.clinic_password.is_empty()
    }

    pub fn is_crm_configured(&self) -> bool {
        !self.crm_base_url.is_empty()
            && !self.crm_client_id.is_empty()
            && !self.crm_client_secret.is_empty()
    }

    pub fn is_storage_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_service_key.is_empty()
    }
}

/// Clinic numeric status -> CRM appointment status. Partial by nature; unmapped
/// codes fall back to "confirmed" at mapping time.
pub fn default_status_map() -> HashMap<String, String> {
    [
        ("1", "scheduled"),
        ("2", "confirmed"),
        ("3", "in_progress"),
        ("4", "completed"),
        ("5", "confirmed"),
    ]
    .into_iter()
    .map(|(code, status)| (code.to_string(), status.to_string()))
    .collect()
}

/// Parses `code=status` pairs separated by commas. Malformed pairs are skipped.
pub fn parse_status_map(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (code, status) = pair.split_once('=')?;
            let (code, status) = (code.trim(), status.trim());
            if code.is_empty() || status.is_empty() {
                warn!("Ignoring malformed CRM_STATUS_MAP entry: {}", pair);
                return None;
            }
            Some((code.to_string(), status.to_string()))
        })
        .collect()
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| {
        warn!("{} not set, using default", key);
        default.to_string()
    })
}

fn env_required(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| {
        warn!("{} not set, using empty value", key);
        String::new()
    })
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value '{}', using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_map_skips_malformed_pairs() {
        let map = parse_status_map("1=scheduled, 7 = no_show,broken,=x");
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("1").map(String::as_str), Some("scheduled"));
        assert_eq!(map.get("7").map(String::as_str), Some("no_show"));
    }

    #[test]
    fn test_default_status_map_covers_known_codes() {
        let map = default_status_map();
        assert_eq!(map.get("5").map(String::as_str), Some("confirmed"));
        assert_eq!(map.get("4").map(String::as_str), Some("completed"));
        assert!(map.get("9").is_none());
    }
}
