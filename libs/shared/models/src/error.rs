use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Auth(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::Database(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::ExternalService(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        tracing::error!("Error: {}: {}", status, message);

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

/// Failure taxonomy shared by both upstream clients, the repository and the
/// sync engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Credentials rejected. Clinic side recovers by re-login, CRM side by the
    /// periodic refresh.
    #[error("Authentication expired: {0}")]
    AuthExpired(String),

    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Upstream validation error ({status}): {message}")]
    UpstreamValidation { status: u16, message: String },

    /// The remote side already holds this record. Terminal, counts as success.
    #[error("Duplicate conflict: {0}")]
    DuplicateConflict(String),

    /// A required link is missing (no invoice, no CRM contact, ...).
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

const DUPLICATE_MARKERS: [&str; 3] = ["duplicate", "already exists", "does not allow duplicated"];

impl SyncError {
    /// Classifies a non-success upstream HTTP status and its body.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => SyncError::AuthExpired(message),
            409 => SyncError::DuplicateConflict(message),
            500..=599 => SyncError::TransientNetwork(format!("HTTP {}: {}", status, message)),
            _ if is_duplicate_message(&message) => SyncError::DuplicateConflict(message),
            _ => SyncError::UpstreamValidation { status, message },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::TransientNetwork(_))
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, SyncError::DuplicateConflict(_))
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, SyncError::AuthExpired(_))
    }
}

pub fn is_duplicate_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    DUPLICATE_MARKERS.iter().any(|marker| lower.contains(marker))
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() || err.is_builder() {
            return SyncError::Serialization(err.to_string());
        }
        if let Some(status) = err.status() {
            return SyncError::from_status(status.as_u16(), err.to_string());
        }
        // Timeouts, refused connections and resets are all worth another attempt.
        SyncError::TransientNetwork(err.to_string())
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::AuthExpired(msg) => AppError::Auth(msg),
            SyncError::TransientNetwork(msg) => AppError::ExternalService(msg),
            SyncError::UpstreamValidation { status, message } => {
                AppError::ExternalService(format!("upstream rejected request ({}): {}", status, message))
            }
            SyncError::DuplicateConflict(msg) => AppError::Conflict(msg),
            SyncError::DataIntegrity(msg) => AppError::Unprocessable(msg),
            SyncError::Repository(msg) => AppError::Database(msg),
            SyncError::NotConfigured(msg) => AppError::Unavailable(msg),
            SyncError::Serialization(msg) => AppError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(SyncError::from_status(503, "down").is_retryable());
        assert!(SyncError::from_status(401, "expired").is_auth_expired());
        assert!(SyncError::from_status(409, "conflict").is_duplicate());
        assert_eq!(
            SyncError::from_status(422, "bad phone"),
            SyncError::UpstreamValidation { status: 422, message: "bad phone".to_string() }
        );
    }

    #[test]
    fn test_duplicate_marker_in_client_error_body() {
        let err = SyncError::from_status(400, "This location does not allow duplicated contacts.");
        assert!(err.is_duplicate());
        assert!(!err.is_retryable());
    }
}
