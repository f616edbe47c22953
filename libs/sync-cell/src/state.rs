use std::sync::Arc;

use clinic_cell::ClinicClient;
use crm_cell::CrmGateway;
use shared_config::AppConfig;

use crate::services::{Dispatcher, SyncOrchestrator, SyncStateRepository, WebhookIngestor};

/// Everything the sync and webhook routes need, wired once at startup.
#[derive(Clone)]
pub struct SyncState {
    pub repository: Arc<dyn SyncStateRepository>,
    pub dispatcher: Arc<Dispatcher>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub webhooks: Arc<WebhookIngestor>,
}

impl SyncState {
    pub fn new(
        config: Arc<AppConfig>,
        clinic: Arc<ClinicClient>,
        crm: Arc<dyn CrmGateway>,
        repository: Arc<dyn SyncStateRepository>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(config.clone(), repository.clone(), crm.clone()));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            config.clone(),
            clinic.clone(),
            repository.clone(),
            dispatcher.clone(),
        ));
        let webhooks = Arc::new(WebhookIngestor::new(config, clinic, crm, repository.clone()));

        Self {
            repository,
            dispatcher,
            orchestrator,
            webhooks,
        }
    }
}
