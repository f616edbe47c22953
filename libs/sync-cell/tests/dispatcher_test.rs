mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::FakeCrm;
use credential_cell::{CrmOAuthService, InMemoryCredentialStore};
use crm_cell::CrmClient;
use shared_models::credentials::{CredentialRecord, UpstreamApi};
use shared_models::error::SyncError;
use shared_models::sync::{CanonicalAppointment, CanonicalContact, RecordSource};
use shared_utils::test_utils::TestConfig;
use sync_cell::*;

fn clinic_contact(clinic_id: &str, phone: Option<&str>) -> CanonicalContact {
    let mut contact = CanonicalContact::new(RecordSource::Clinic);
    contact.clinic_patient_id = Some(clinic_id.to_string());
    contact.first_name = Some("Anna".to_string());
    contact.last_name = Some("Muster".to_string());
    contact.phone = phone.map(str::to_string);
    contact
}

fn appointment(clinic_id: &str, crm_contact_id: Option<&str>) -> CanonicalAppointment {
    let start = Utc.with_ymd_and_hms(2025, 10, 1, 8, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2025, 10, 1, 8, 30, 0).unwrap();
    let mut appointment = CanonicalAppointment::new("42", start, end, RecordSource::Clinic);
    appointment.clinic_appointment_id = Some(clinic_id.to_string());
    appointment.crm_contact_id = crm_contact_id.map(str::to_string);
    appointment
}

fn dispatcher(crm: Arc<FakeCrm>, repository: Arc<InMemorySyncStateRepository>) -> Dispatcher {
    let config = TestConfig::default().to_arc();
    Dispatcher::new(config, repository, crm)
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_bounds_total_duration() {
    let mut config = TestConfig::default().to_app_config();
    config.dispatcher_rate_per_second = 10;
    config.dispatcher_workers = 8;

    let repository = Arc::new(InMemorySyncStateRepository::new());
    let rows: Vec<CanonicalContact> = (0..100).map(|i| clinic_contact(&i.to_string(), None)).collect();
    repository.insert_contacts(&rows).await.unwrap();

    let crm = Arc::new(FakeCrm::new());
    let dispatcher = Dispatcher::new(Arc::new(config), repository.clone(), crm.clone());
    let jobs = rows.iter().map(|row| DispatchJob::PushContact(row.id)).collect();

    let start = tokio::time::Instant::now();
    let stats = dispatcher.run(jobs).await;

    assert!(start.elapsed() >= Duration::from_millis(9_900));
    assert_eq!(stats.created, 100);
    assert_eq!(crm.contacts_created.load(Ordering::SeqCst), 100);
    assert!(repository.all_contacts().await.iter().all(|c| c.crm_contact_id.is_some()));
}

#[tokio::test]
async fn test_create_writes_back_crm_id() {
    let repository = Arc::new(InMemorySyncStateRepository::new());
    let row = clinic_contact("42", Some("+41791234567"));
    repository.insert_contacts(&[row.clone()]).await.unwrap();

    let crm = Arc::new(FakeCrm::with_ids(&["abc"]));
    let outcome = dispatcher(crm, repository.clone())
        .dispatch_one(DispatchJob::PushContact(row.id))
        .await;

    assert_eq!(outcome, DispatchOutcome::Created { remote_id: "abc".to_string() });
    let stored = repository.contact(row.id).await.unwrap().unwrap();
    assert_eq!(stored.crm_contact_id.as_deref(), Some("abc"));
    assert_eq!(stored.clinic_patient_id.as_deref(), Some("42"));
}

#[tokio::test]
async fn test_linked_row_is_updated_not_created() {
    let repository = Arc::new(InMemorySyncStateRepository::new());
    let mut row = clinic_contact("42", Some("+41791234567"));
    row.crm_contact_id = Some("abc".to_string());
    repository.insert_contacts(&[row.clone()]).await.unwrap();

    let crm = Arc::new(FakeCrm::new());
    let outcome = dispatcher(crm.clone(), repository)
        .dispatch_one(DispatchJob::PushContact(row.id))
        .await;

    assert_eq!(outcome, DispatchOutcome::Updated);
    assert_eq!(crm.contacts_updated.load(Ordering::SeqCst), 1);
    assert_eq!(crm.contacts_created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_phone_twin_of_linked_row_is_skipped() {
    let repository = Arc::new(InMemorySyncStateRepository::new());
    let mut linked = clinic_contact("41", Some("+41 79 123 45 67"));
    linked.crm_contact_id = Some("abc".to_string());
    let twin = clinic_contact("42", Some("0791234567"));
    repository.insert_contacts(&[linked, twin.clone()]).await.unwrap();

    let crm = Arc::new(FakeCrm::new());
    let outcome = dispatcher(crm.clone(), repository.clone())
        .dispatch_one(DispatchJob::PushContact(twin.id))
        .await;

    assert_eq!(outcome, DispatchOutcome::SkippedDuplicate);
    assert_eq!(crm.contacts_created.load(Ordering::SeqCst), 0);
    assert!(repository.contact(twin.id).await.unwrap().unwrap().crm_contact_id.is_none());
}

#[tokio::test]
async fn test_remote_duplicate_counts_as_skip() {
    let repository = Arc::new(InMemorySyncStateRepository::new());
    let row = clinic_contact("42", Some("+41791234567"));
    repository.insert_contacts(&[row.clone()]).await.unwrap();

    let crm = Arc::new(FakeCrm::failing(SyncError::DuplicateConflict(
        "This location does not allow duplicated contacts.".to_string(),
    )));
    let stats = dispatcher(crm, repository.clone())
        .run(vec![DispatchJob::PushContact(row.id)])
        .await;

    assert_eq!(stats.skipped_duplicate, 1);
    assert_eq!(stats.errors, 0);
    assert!(repository.contact(row.id).await.unwrap().unwrap().crm_contact_id.is_none());
}

#[tokio::test]
async fn test_failures_are_counted_per_item() {
    let repository = Arc::new(InMemorySyncStateRepository::new());
    let rows = vec![clinic_contact("1", None), clinic_contact("2", None)];
    repository.insert_contacts(&rows).await.unwrap();

    let crm = Arc::new(FakeCrm::failing(SyncError::UpstreamValidation {
        status: 422,
        message: "bad phone".to_string(),
    }));
    let mut jobs: Vec<DispatchJob> = rows.iter().map(|row| DispatchJob::PushContact(row.id)).collect();
    jobs.push(DispatchJob::PushContact(uuid::Uuid::new_v4()));

    let stats = dispatcher(crm, repository).run(jobs).await;

    assert_eq!(stats.errors, 3);
    assert_eq!(stats.total(), 3);
}

#[tokio::test]
async fn test_appointment_push_writes_back_and_skips_pushed_rows() {
    let repository = Arc::new(InMemorySyncStateRepository::new());
    let pending = appointment("9001", Some("abc"));
    let mut pushed = appointment("9002", Some("abc"));
    pushed.crm_appointment_id = Some("apt-1".to_string());
    repository.insert_appointments(&[pending.clone(), pushed.clone()]).await.unwrap();

    let crm = Arc::new(FakeCrm::with_ids(&["apt-9"]));
    let dispatcher = dispatcher(crm.clone(), repository.clone());

    assert_eq!(
        dispatcher.dispatch_one(DispatchJob::PushAppointment(pending.id)).await,
        DispatchOutcome::Created { remote_id: "apt-9".to_string() }
    );
    assert_eq!(
        dispatcher.dispatch_one(DispatchJob::PushAppointment(pushed.id)).await,
        DispatchOutcome::SkippedDuplicate
    );
    assert_eq!(crm.appointments_created.load(Ordering::SeqCst), 1);

    let stored = repository.appointment(pending.id).await.unwrap().unwrap();
    assert_eq!(stored.crm_appointment_id.as_deref(), Some("apt-9"));
}

#[tokio::test]
async fn test_appointment_without_contact_is_integrity_error() {
    let repository = Arc::new(InMemorySyncStateRepository::new());
    let orphan = appointment("9001", None);
    repository.insert_appointments(&[orphan.clone()]).await.unwrap();

    let crm = Arc::new(FakeCrm::new());
    let outcome = dispatcher(crm.clone(), repository)
        .dispatch_one(DispatchJob::PushAppointment(orphan.id))
        .await;

    assert_matches!(outcome, DispatchOutcome::Error(SyncError::DataIntegrity(_)));
    assert_eq!(crm.appointments_created.load(Ordering::SeqCst), 0);
}

// Retry behavior through the real CRM client.

fn crm_client(server: &MockServer) -> Arc<CrmClient> {
    let config = TestConfig::with_upstreams("http://clinic.invalid", &server.uri()).to_arc();
    let mut record = CredentialRecord::new(UpstreamApi::Crm, "crm-access");
    record.location_id = Some("loc-1".to_string());

    let store = Arc::new(InMemoryCredentialStore::with_record(record));
    let oauth = Arc::new(CrmOAuthService::new(config.clone(), store));
    Arc::new(CrmClient::new(config, oauth))
}

#[tokio::test]
async fn test_validation_error_is_attempted_once() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/contacts/"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({ "message": "phone is invalid" })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let repository = Arc::new(InMemorySyncStateRepository::new());
    let row = clinic_contact("42", Some("+41791234567"));
    repository.insert_contacts(&[row.clone()]).await.unwrap();

    let dispatcher = Dispatcher::new(TestConfig::default().to_arc(), repository, crm_client(&mock_server));
    let outcome = dispatcher.dispatch_one(DispatchJob::PushContact(row.id)).await;

    assert_eq!(outcome.status(), "error");
    assert_matches!(outcome, DispatchOutcome::Error(SyncError::UpstreamValidation { status: 422, .. }));
}

#[tokio::test]
async fn test_server_error_is_attempted_three_times() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/contacts/"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&mock_server)
        .await;

    let repository = Arc::new(InMemorySyncStateRepository::new());
    let row = clinic_contact("42", Some("+41791234567"));
    repository.insert_contacts(&[row.clone()]).await.unwrap();

    let dispatcher = Dispatcher::new(TestConfig::default().to_arc(), repository.clone(), crm_client(&mock_server));
    let outcome = dispatcher.dispatch_one(DispatchJob::PushContact(row.id)).await;

    assert_matches!(outcome, DispatchOutcome::Error(SyncError::TransientNetwork(_)));
    assert!(repository.contact(row.id).await.unwrap().unwrap().crm_contact_id.is_none());
}

#[tokio::test]
async fn test_retries_are_admitted_by_the_limiter() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/contacts/"))
        .respond_with(ResponseTemplate::new(503))
        .expect(12)
        .mount(&mock_server)
        .await;

    let mut config = TestConfig::with_upstreams("http://clinic.invalid", &mock_server.uri()).to_app_config();
    config.dispatcher_rate_per_second = 10;
    config.dispatcher_workers = 4;
    config.retry_base_delay_ms = 1;

    let repository = Arc::new(InMemorySyncStateRepository::new());
    let rows: Vec<CanonicalContact> = (0..4).map(|i| clinic_contact(&i.to_string(), None)).collect();
    repository.insert_contacts(&rows).await.unwrap();

    let dispatcher = Dispatcher::new(Arc::new(config), repository, crm_client(&mock_server));
    let jobs = rows.iter().map(|row| DispatchJob::PushContact(row.id)).collect();

    let start = std::time::Instant::now();
    let stats = dispatcher.run(jobs).await;
    let elapsed = start.elapsed();

    assert_eq!(stats.errors, 4);
    let writes = mock_server.received_requests().await.unwrap().len();
    assert_eq!(writes, 12);
    // Twelve admissions at 10/s need at least eleven spacings.
    assert!(elapsed >= Duration::from_millis(1_100), "elapsed {:?}", elapsed);
}
