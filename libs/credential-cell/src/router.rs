use std::sync::Arc;
use axum::{routing::{get, post}, Router};

use crate::handlers::*;
use crate::services::CrmOAuthService;

pub fn create_credential_router(oauth: Arc<CrmOAuthService>) -> Router {
    Router::new()
        .route("/connect", get(connect))
        .route("/callback", get(callback))
        .route("/refresh", post(refresh))
        .with_state(oauth)
}
