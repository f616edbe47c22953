pub mod store;
pub mod clinic_auth;
pub mod crm_oauth;

pub use store::*;
pub use clinic_auth::*;
pub use crm_oauth::*;
