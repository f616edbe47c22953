use axum::{routing::post, Router};

use crate::handlers::*;
use crate::state::SyncState;

pub fn create_sync_router(state: SyncState) -> Router {
    Router::new()
        .route("/patients", post(sync_patients))
        .route("/appointments", post(sync_appointments))
        .route("/run", post(run_cycle))
        .route("/contacts/{id}/push", post(push_contact))
        .route("/appointments/{id}/push", post(push_appointment))
        .with_state(state)
}

pub fn create_webhook_router(state: SyncState) -> Router {
    Router::new()
        .route("/crm", post(crm_webhook))
        .with_state(state)
}
