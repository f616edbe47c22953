use std::sync::Arc;
use assert_matches::assert_matches;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use credential_cell::*;
use shared_models::credentials::{CredentialRecord, UpstreamApi};
use shared_models::error::SyncError;
use shared_utils::test_utils::{MockUpstreamResponses, TestConfig};

fn oauth_service(crm_uri: &str, store: Arc<InMemoryCredentialStore>) -> Arc<CrmOAuthService> {
    let config = TestConfig::with_upstreams("http://clinic.invalid", crm_uri).to_arc();
    Arc::new(CrmOAuthService::new(config, store))
}

fn stored_crm_record(access: &str, refresh: &str) -> CredentialRecord {
    let mut record = CredentialRecord::new(UpstreamApi::Crm, access);
    record.refresh_token = Some(refresh.to_string());
    record.location_id = Some("loc-1".to_string());
    record
}

#[tokio::test]
async fn test_exchange_code_stores_credentials() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(MockUpstreamResponses::crm_token_response("access-1", "refresh-1")),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = Arc::new(InMemoryCredentialStore::new());
    let oauth = oauth_service(&mock_server.uri(), store.clone());

    let record = oauth.exchange_code("auth-code-1").await.unwrap();
    assert_eq!(record.access_token, "access-1");

    let stored = store.get(UpstreamApi::Crm).await.unwrap().unwrap();
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-1"));
    assert_eq!(stored.location_id.as_deref(), Some("loc-1"));
    assert_eq!(stored.company_id.as_deref(), Some("company-1"));

    let access = oauth.access().await.unwrap();
    assert_eq!(access.access_token, "access-1");
    assert_eq!(access.location_id, "loc-1");
}

#[tokio::test]
async fn test_refresh_keeps_old_refresh_token_when_none_returned() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "access-2",
            "expires_in": 86399
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = Arc::new(InMemoryCredentialStore::with_record(stored_crm_record("access-1", "refresh-1")));
    let oauth = oauth_service(&mock_server.uri(), store.clone());

    let report = oauth.refresh().await;
    assert!(report.is_success(), "{}", report.message);

    let stored = store.get(UpstreamApi::Crm).await.unwrap().unwrap();
    assert_eq!(stored.access_token, "access-2");
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-1"));
    assert_eq!(stored.location_id.as_deref(), Some("loc-1"));
}

#[tokio::test]
async fn test_refresh_failure_is_reported_not_raised() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid_grant"))
        .mount(&mock_server)
        .await;

    let store = Arc::new(InMemoryCredentialStore::with_record(stored_crm_record("access-1", "refresh-1")));
    let oauth = oauth_service(&mock_server.uri(), store.clone());

    let report = oauth.refresh().await;
    assert_eq!(report.status, RefreshStatus::Failure);
    assert!(report.message.contains("Token refresh failed"));

    let stored = store.get(UpstreamApi::Crm).await.unwrap().unwrap();
    assert_eq!(stored.access_token, "access-1");
}

#[tokio::test]
async fn test_refresh_without_credentials() {
    let store = Arc::new(InMemoryCredentialStore::new());
    let oauth = oauth_service("http://crm.invalid", store);

    let report = oauth.refresh().await;
    assert_eq!(report.status, RefreshStatus::Failure);
    assert_eq!(report.message, "No authentication credentials found");
    assert_matches!(oauth.access().await, Err(SyncError::NotConfigured(_)));
}

#[tokio::test]
async fn test_connect_redirects_to_authorize_url() {
    let oauth = oauth_service("http://crm.invalid", Arc::new(InMemoryCredentialStore::new()));
    let app = create_credential_router(oauth);

    let response = app
        .oneshot(Request::builder().uri("/connect").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.starts_with("http://crm.invalid/oauth/chooselocation?response_type=code"));
    assert!(location.contains("client_id=test-client-id"));
}

#[tokio::test]
async fn test_callback_without_code_is_bad_request() {
    let oauth = oauth_service("http://crm.invalid", Arc::new(InMemoryCredentialStore::new()));
    let app = create_credential_router(oauth);

    let response = app
        .oneshot(Request::builder().uri("/callback").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
