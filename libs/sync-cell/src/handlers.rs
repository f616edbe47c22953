use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use serde_json::Value;
use uuid::Uuid;

use shared_models::error::AppError;

use crate::models::{DispatchJob, PushResult, SyncReport, SyncScope, WebhookAck};
use crate::state::SyncState;

async fn run_scope(state: &SyncState, scope: SyncScope) -> Result<Json<Vec<SyncReport>>, AppError> {
    state
        .orchestrator
        .try_run(scope)
        .await
        .map(Json)
        .ok_or_else(|| AppError::Conflict("A sync cycle is already running".to_string()))
}

#[axum::debug_handler]
pub async fn sync_patients(State(state): State<SyncState>) -> Result<Json<Vec<SyncReport>>, AppError> {
    run_scope(&state, SyncScope::Patients).await
}

#[axum::debug_handler]
pub async fn sync_appointments(State(state): State<SyncState>) -> Result<Json<Vec<SyncReport>>, AppError> {
    run_scope(&state, SyncScope::Appointments).await
}

#[axum::debug_handler]
pub async fn run_cycle(State(state): State<SyncState>) -> Result<Json<Vec<SyncReport>>, AppError> {
    run_scope(&state, SyncScope::Full).await
}

#[axum::debug_handler]
pub async fn push_contact(
    State(state): State<SyncState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PushResult>, AppError> {
    if state.repository.contact(id).await?.is_none() {
        return Err(AppError::NotFound(format!("Contact {} not found", id)));
    }

    let outcome = state.dispatcher.dispatch_one(DispatchJob::PushContact(id)).await;
    Ok(Json(PushResult::from_outcome(id, &outcome)))
}

#[axum::debug_handler]
pub async fn push_appointment(
    State(state): State<SyncState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PushResult>, AppError> {
    if state.repository.appointment(id).await?.is_none() {
        return Err(AppError::NotFound(format!("Appointment {} not found", id)));
    }

    let outcome = state.dispatcher.dispatch_one(DispatchJob::PushAppointment(id)).await;
    Ok(Json(PushResult::from_outcome(id, &outcome)))
}

/// Raw body so that any malformed payload is a plain 400.
#[axum::debug_handler]
pub async fn crm_webhook(State(state): State<SyncState>, body: Bytes) -> Result<Json<WebhookAck>, AppError> {
    let event: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {}", e)))?;

    if !event.is_object() {
        return Err(AppError::BadRequest("Webhook body must be a JSON object".to_string()));
    }

    state.webhooks.handle(event).await.map(Json)
}
