use std::sync::Arc;
use axum::{
    extract::{Query, State},
    response::Redirect,
    Json,
};
use serde_json::{json, Value};
use tracing::info;

use shared_models::error::AppError;

use crate::models::{OAuthCallbackQuery, RefreshReport};
use crate::services::CrmOAuthService;

#[axum::debug_handler]
pub async fn connect(
    State(oauth): State<Arc<CrmOAuthService>>,
) -> Result<Redirect, AppError> {
    if !oauth.is_configured() {
        return Err(AppError::Unavailable("CRM OAuth client is not configured".to_string()));
    }

    Ok(Redirect::temporary(&oauth.authorize_url()))
}

#[axum::debug_handler]
pub async fn callback(
    State(oauth): State<Arc<CrmOAuthService>>,
    Query(query): Query<OAuthCallbackQuery>,
) -> Result<Json<Value>, AppError> {
    let code = query
        .code
        .filter(|code| !code.is_empty())
        .ok_or_else(|| AppError::BadRequest("Authorization code not received from OAuth".to_string()))?;

    let record = oauth.exchange_code(&code).await?;
    info!("CRM connected");

    Ok(Json(json!({
        "message": "Authentication successful",
        "token_stored": true,
        "location_id": record.location_id,
        "expires_at": record.expires_at,
    })))
}

#[axum::debug_handler]
pub async fn refresh(
    State(oauth): State<Arc<CrmOAuthService>>,
) -> Json<RefreshReport> {
    Json(oauth.refresh().await)
}
