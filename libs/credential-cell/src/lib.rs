pub mod models;
pub mod services;
pub mod handlers;
pub mod router;

pub use models::*;
pub use services::*;
pub use router::create_credential_router;
