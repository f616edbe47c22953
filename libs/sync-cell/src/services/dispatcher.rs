use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crm_cell::{CrmGateway, RetryPolicy};
use shared_config::AppConfig;
use shared_models::error::SyncError;
use shared_models::sync::CanonicalContact;
use shared_utils::phone_match_key;

use crate::models::{DispatchJob, DispatchOutcome, DispatchStats};
use crate::services::limiter::RateLimiter;
use crate::services::mapper;
use crate::services::repository::SyncStateRepository;

/// Pushes canonical rows to the CRM through a fixed pool of workers sharing
/// one rate limiter. Every HTTP attempt, retries included, is admitted by the
/// limiter. Only the newly acquired CRM id is ever written back.
#[derive(Clone)]
pub struct Dispatcher {
    config: Arc<AppConfig>,
    repository: Arc<dyn SyncStateRepository>,
    crm: Arc<dyn CrmGateway>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    workers: usize,
}

impl Dispatcher {
    pub fn new(
        config: Arc<AppConfig>,
        repository: Arc<dyn SyncStateRepository>,
        crm: Arc<dyn CrmGateway>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.dispatcher_rate_per_second));
        let retry = RetryPolicy::from_config(&config);
        let workers = config.dispatcher_workers.max(1);
        Self {
            config,
            repository,
            crm,
            limiter,
            retry,
            workers,
        }
    }

    /// Runs `call` under the retry policy, waiting for the limiter before
    /// each attempt.
    async fn admitted<T, F, Fut>(&self, operation: &str, call: F) -> Result<T, SyncError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let (limiter, call) = (&self.limiter, &call);
        self.retry
            .run(operation, move || async move {
                limiter.acquire().await;
                call().await
            })
            .await
    }

    /// Runs every job to an outcome. Per-item failures are counted, never
    /// propagated.
    #[instrument(skip_all, fields(jobs = jobs.len()))]
    pub async fn run(&self, jobs: Vec<DispatchJob>) -> DispatchStats {
        if jobs.is_empty() {
            return DispatchStats::default();
        }

        let workers = self.workers.min(jobs.len());
        let (tx, rx) = mpsc::channel::<DispatchJob>(workers * 2);
        let rx = Arc::new(Mutex::new(rx));

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let dispatcher = self.clone();
            let rx = rx.clone();
            handles.push(tokio::spawn(async move {
                let mut stats = DispatchStats::default();
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(job) = next else { break };
                    let outcome = dispatcher.process(job).await;
                    stats.record(&outcome);
                }
                debug!("Dispatch worker {} drained", worker);
                stats
            }));
        }

        for job in jobs {
            if tx.send(job).await.is_err() {
                error!("All dispatch workers stopped early");
                break;
            }
        }
        drop(tx);

        let mut stats = DispatchStats::default();
        for result in futures::future::join_all(handles).await {
            match result {
                Ok(worker_stats) => {
                    stats.created += worker_stats.created;
                    stats.updated += worker_stats.updated;
                    stats.skipped_duplicate += worker_stats.skipped_duplicate;
                    stats.errors += worker_stats.errors;
                }
                Err(e) => error!("Dispatch worker panicked: {}", e),
            }
        }

        info!(
            "Dispatch finished: {} created, {} updated, {} skipped, {} errors",
            stats.created, stats.updated, stats.skipped_duplicate, stats.errors
        );
        stats
    }

    /// Ad-hoc single-record push, subject to the same rate limit.
    pub async fn dispatch_one(&self, job: DispatchJob) -> DispatchOutcome {
        self.process(job).await
    }

    async fn process(&self, job: DispatchJob) -> DispatchOutcome {
        let result = match job {
            DispatchJob::PushContact(id) => self.push_contact(id).await,
            DispatchJob::PushAppointment(id) => self.push_appointment(id).await,
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) if e.is_duplicate() => {
                warn!("Row {} already exists in CRM: {}", job.row_id(), e);
                DispatchOutcome::SkippedDuplicate
            }
            Err(e) => {
                error!("Push of row {} failed: {}", job.row_id(), e);
                DispatchOutcome::Error(e)
            }
        }
    }

    async fn push_contact(&self, id: Uuid) -> Result<DispatchOutcome, SyncError> {
        let contact = self
            .repository
            .contact(id)
            .await?
            .ok_or_else(|| SyncError::DataIntegrity(format!("contact row {} not found", id)))?;
        let payload = &mapper::crm_contact_payload(&contact);

        if let Some(crm_id) = &contact.crm_contact_id {
            self.admitted("CRM contact update", move || self.crm.update_contact(crm_id, payload))
                .await?;
            return Ok(DispatchOutcome::Updated);
        }

        if self.has_linked_twin(&contact).await? {
            info!("Contact row {} shares phone or email with a linked row, not creating", id);
            return Ok(DispatchOutcome::SkippedDuplicate);
        }

        let remote_id = self
            .admitted("CRM contact create", move || self.crm.create_contact(payload))
            .await?;
        self.repository.set_contact_crm_id(id, &remote_id).await?;
        Ok(DispatchOutcome::Created { remote_id })
    }

    /// Another row with the same phone or email already owns a CRM contact.
    async fn has_linked_twin(&self, contact: &CanonicalContact) -> Result<bool, SyncError> {
        if contact.phone.is_none() && contact.email.is_none() {
            return Ok(false);
        }

        let phone_key = contact.phone.as_deref().and_then(phone_match_key);
        let candidates = self
            .repository
            .contact_candidates(contact.phone.as_deref(), contact.email.as_deref())
            .await?;

        Ok(candidates.iter().any(|row| {
            let same_phone = phone_key.is_some() && row.phone.as_deref().and_then(phone_match_key) == phone_key;
            let same_email = match (&row.email, &contact.email) {
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => false,
            };
            row.id != contact.id && row.crm_contact_id.is_some() && (same_phone || same_email)
        }))
    }

    async fn push_appointment(&self, id: Uuid) -> Result<DispatchOutcome, SyncError> {
        let appointment = self
            .repository
            .appointment(id)
            .await?
            .ok_or_else(|| SyncError::DataIntegrity(format!("appointment row {} not found", id)))?;

        if appointment.crm_appointment_id.is_some() {
            return Ok(DispatchOutcome::SkippedDuplicate);
        }

        let payload = &mapper::crm_appointment_payload(&appointment, &self.config)?;

        let remote_id = self
            .admitted("CRM appointment create", move || self.crm.create_appointment(payload))
            .await?;
        self.repository.set_appointment_crm_id(id, &remote_id).await?;
        Ok(DispatchOutcome::Created { remote_id })
    }
}
