use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use credential_cell::CrmOAuthService;
use shared_config::AppConfig;
use sync_cell::{SyncScope, SyncState};

/// Starts the periodic full sync and the CRM token refresh loops.
pub fn spawn(config: Arc<AppConfig>, state: SyncState, oauth: Arc<CrmOAuthService>) {
    if config.is_clinic_configured() {
        tokio::spawn(sync_loop(config.clone(), state));
    } else {
        warn!("Clinic System not configured, periodic sync disabled");
    }

    if config.is_crm_configured() {
        tokio::spawn(refresh_loop(config, oauth));
    } else {
        warn!("CRM OAuth client not configured, token refresh disabled");
    }
}

/// First tick fires immediately, so a cycle runs at startup.
async fn sync_loop(config: Arc<AppConfig>, state: SyncState) {
    let mut ticker = interval(Duration::from_secs(config.sync_interval_seconds.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        debug!("Scheduled sync tick");

        match state.orchestrator.try_run(SyncScope::Full).await {
            Some(reports) => {
                for report in reports.iter().filter(|r| !r.success) {
                    error!("Scheduled {:?} sync failed: {:?}", report.kind, report.error);
                }
            }
            None => info!("Previous sync cycle still running, skipping this tick"),
        }
    }
}

async fn refresh_loop(config: Arc<AppConfig>, oauth: Arc<CrmOAuthService>) {
    let period = Duration::from_secs(config.crm_refresh_interval_seconds.max(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let report = oauth.refresh().await;
        if !report.is_success() {
            error!("Scheduled CRM token refresh failed: {}", report.message);
        }
    }
}
