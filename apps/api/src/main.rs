use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::{self, TraceLayer};
use tracing::{Level, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;
mod scheduler;

use clinic_cell::ClinicClient;
use credential_cell::{
    ClinicAuthService, CredentialStore, CrmOAuthService, InMemoryCredentialStore, SupabaseCredentialStore,
};
use crm_cell::CrmClient;
use shared_config::AppConfig;
use sync_cell::{InMemorySyncStateRepository, SupabaseSyncStateRepository, SyncState, SyncStateRepository};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Clinic/CRM sync bridge");

    let config = Arc::new(AppConfig::from_env());

    // Storage: PostgREST when configured, process memory otherwise
    let credentials: Arc<dyn CredentialStore>;
    let repository: Arc<dyn SyncStateRepository>;
    if config.is_storage_configured() {
        credentials = Arc::new(SupabaseCredentialStore::new(&config));
        repository = Arc::new(SupabaseSyncStateRepository::new(&config));
    } else {
        warn!("Storage not configured, sync state and credentials are kept in memory only");
        credentials = Arc::new(InMemoryCredentialStore::new());
        repository = Arc::new(InMemorySyncStateRepository::new());
    }

    let clinic_auth = Arc::new(ClinicAuthService::new(config.clone(), credentials.clone()));
    let crm_oauth = Arc::new(CrmOAuthService::new(config.clone(), credentials));
    let clinic = Arc::new(ClinicClient::new(config.clone(), clinic_auth));
    let crm = Arc::new(CrmClient::new(config.clone(), crm_oauth.clone()));

    let state = SyncState::new(config.clone(), clinic, crm, repository);

    scheduler::spawn(config.clone(), state.clone(), crm_oauth.clone());

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(state, crm_oauth)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new()
                    .level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new()
                    .level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .await
        .context("server terminated")?;

    Ok(())
}
