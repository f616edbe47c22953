pub mod dispatcher;
pub mod limiter;
pub mod mapper;
pub mod matching;
pub mod orchestrator;
pub mod repository;
pub mod supabase_repository;
pub mod webhook;

pub use dispatcher::*;
pub use limiter::*;
pub use orchestrator::*;
pub use repository::*;
pub use supabase_repository::*;
pub use webhook::*;
