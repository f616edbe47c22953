pub mod models;
pub mod services;
pub mod state;
pub mod handlers;
pub mod router;

pub use models::*;
pub use services::*;
pub use state::SyncState;
pub use router::{create_sync_router, create_webhook_router};
