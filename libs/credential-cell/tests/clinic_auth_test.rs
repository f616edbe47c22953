use std::sync::Arc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use credential_cell::*;
use shared_models::credentials::{CredentialRecord, UpstreamApi};
use shared_utils::test_utils::{MockUpstreamResponses, TestConfig};

fn auth_service(clinic_uri: &str, store: Arc<InMemoryCredentialStore>) -> Arc<ClinicAuthService> {
    let config = TestConfig::with_upstreams(clinic_uri, "http://crm.invalid").to_arc();
    Arc::new(ClinicAuthService::new(config, store))
}

async fn mount_login(server: &MockServer, token: &str, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_partial_json(serde_json::json!({ "email": "sync@example.com" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(MockUpstreamResponses::clinic_login_response(token)))
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_first_use_logs_in_and_persists() {
    let mock_server = MockServer::start().await;
    mount_login(&mock_server, "token-1", 1).await;

    let store = Arc::new(InMemoryCredentialStore::new());
    let auth = auth_service(&mock_server.uri(), store.clone());

    let record = auth.credentials().await.unwrap();
    assert_eq!(record.access_token, "token-1");
    assert_eq!(record.crypto_key.as_deref(), Some("crypto-key-1"));

    // Second call is served from the store.
    let again = auth.credentials().await.unwrap();
    assert_eq!(again.access_token, "token-1");

    let stored = store.get(UpstreamApi::Clinic).await.unwrap().unwrap();
    assert_eq!(stored.practice_id.as_deref(), Some("practice-7"));
}

#[tokio::test]
async fn test_relogin_skipped_when_token_already_replaced() {
    let mock_server = MockServer::start().await;
    mount_login(&mock_server, "unused", 0).await;

    let store = Arc::new(InMemoryCredentialStore::with_record(CredentialRecord::new(
        UpstreamApi::Clinic,
        "newer-token",
    )));
    let auth = auth_service(&mock_server.uri(), store);

    let record = auth.refresh_after(Some("stale-token")).await.unwrap();
    assert_eq!(record.access_token, "newer-token");
}

#[tokio::test]
async fn test_concurrent_relogins_share_one_login() {
    let mock_server = MockServer::start().await;
    mount_login(&mock_server, "fresh-token", 1).await;

    let store = Arc::new(InMemoryCredentialStore::with_record(CredentialRecord::new(
        UpstreamApi::Clinic,
        "stale-token",
    )));
    let auth = auth_service(&mock_server.uri(), store.clone());

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let auth = auth.clone();
            tokio::spawn(async move { auth.refresh_after(Some("stale-token")).await })
        })
        .collect();

    for handle in handles {
        let record = handle.await.unwrap().unwrap();
        assert_eq!(record.access_token, "fresh-token");
    }

    let stored = store.get(UpstreamApi::Clinic).await.unwrap().unwrap();
    assert_eq!(stored.access_token, "fresh-token");
}

#[tokio::test]
async fn test_login_rejected_is_auth_expired() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
        .mount(&mock_server)
        .await;

    let auth = auth_service(&mock_server.uri(), Arc::new(InMemoryCredentialStore::new()));
    let err = auth.login().await.unwrap_err();
    assert!(err.is_auth_expired());
}
