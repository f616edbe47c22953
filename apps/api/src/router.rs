use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use credential_cell::{create_credential_router, CrmOAuthService};
use sync_cell::{create_sync_router, create_webhook_router, SyncState};

pub fn create_router(state: SyncState, oauth: Arc<CrmOAuthService>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic/CRM sync bridge is running!" }))
        .nest("/auth", create_credential_router(oauth))
        .nest("/sync", create_sync_router(state.clone()))
        .nest("/webhooks", create_webhook_router(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::{Request, StatusCode}};
    use tower::ServiceExt;

    use clinic_cell::ClinicClient;
    use credential_cell::{ClinicAuthService, InMemoryCredentialStore};
    use crm_cell::CrmClient;
    use shared_utils::test_utils::TestConfig;
    use sync_cell::InMemorySyncStateRepository;

    fn app() -> Router {
        let config = TestConfig::default().to_arc();

        let credentials = Arc::new(InMemoryCredentialStore::new());
        let clinic_auth = Arc::new(ClinicAuthService::new(config.clone(), credentials.clone()));
        let oauth = Arc::new(CrmOAuthService::new(config.clone(), credentials));
        let clinic = Arc::new(ClinicClient::new(config.clone(), clinic_auth));
        let crm = Arc::new(CrmClient::new(config.clone(), oauth.clone()));
        let repository = Arc::new(InMemorySyncStateRepository::new());

        create_router(SyncState::new(config, clinic, crm, repository), oauth)
    }

    #[tokio::test]
    async fn test_root_and_webhook_routes_are_mounted() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/crm")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"type":"NoteCreate"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
