use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
    Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use shared_config::AppConfig;
use shared_models::error::SyncError;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Unique constraint violation (PostgREST answers 409).
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid header value: {0}")]
    InvalidHeader(String),
}

impl From<DatabaseError> for SyncError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Conflict(msg) => SyncError::DuplicateConflict(msg),
            other => SyncError::Repository(other.to_string()),
        }
    }
}

/// Thin PostgREST client for the sync-state and credential tables.
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    service_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            service_key: config.supabase_service_key.clone(),
        }
    }

    fn get_headers(&self) -> Result<HeaderMap, DatabaseError> {
        let mut headers = HeaderMap::new();

        headers.insert(
            "apikey",
            HeaderValue::from_str(&self.service_key)
                .map_err(|e| DatabaseError::InvalidHeader(e.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.service_key))
                .map_err(|e| DatabaseError::InvalidHeader(e.to_string()))?,
        );

        Ok(headers)
    }

    pub async fn request<T>(&self, method: Method, path: &str, body: Option<Value>) -> Result<T, DatabaseError>
    where T: DeserializeOwned {
        self.request_with_headers(method, path, body, None).await
    }

    pub async fn request_with_headers<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        extra_headers: Option<HeaderMap>,
    ) -> Result<T, DatabaseError>
    where T: DeserializeOwned {
        let response = self.send(method, path, body, extra_headers).await?;
        let data = response.json::<T>().await?;
        Ok(data)
    }

    /// Sends a write whose response body is not needed (`Prefer: return=minimal`).
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        extra_headers: Option<HeaderMap>,
    ) -> Result<(), DatabaseError> {
        self.send(method, path, body, extra_headers).await?;
        Ok(())
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        extra_headers: Option<HeaderMap>,
    ) -> Result<reqwest::Response, DatabaseError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut headers = self.get_headers()?;
        if let Some(extra) = extra_headers {
            headers.extend(extra);
        }

        let mut req = self.client.request(method, &url).headers(headers);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            error!("PostgREST error ({}): {}", status, error_text);

            return Err(match status.as_u16() {
                401 | 403 => DatabaseError::Auth(error_text),
                404 => DatabaseError::NotFound(error_text),
                409 => DatabaseError::Conflict(error_text),
                code => DatabaseError::Api { status: code, message: error_text },
            });
        }

        Ok(response)
    }

    /// `Prefer` header helper, e.g. `prefer("resolution=ignore-duplicates,return=representation")`.
    pub fn prefer(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static(value));
        headers
    }
}

/// Builds a PostgREST `in.(...)` filter value with each id quoted and escaped.
pub fn in_filter(values: &[String]) -> String {
    let quoted: Vec<String> = values
        .iter()
        .map(|v| format!("\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    urlencode(&format!("in.({})", quoted.join(",")))
}

/// Builds a PostgREST `eq.` filter value.
pub fn eq_filter(value: &str) -> String {
    urlencode(&format!("eq.{}", value))
}

fn urlencode(raw: &str) -> String {
    urlencoding::encode(raw).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eq_filter_encodes_reserved_characters() {
        assert_eq!(eq_filter("42"), "eq.42");
        assert_eq!(eq_filter("a&b"), "eq.a%26b");
    }

    #[test]
    fn test_in_filter_quotes_values() {
        let filter = in_filter(&["1".to_string(), "2".to_string()]);
        assert_eq!(filter, "in.%28%221%22%2C%222%22%29");
    }
}
