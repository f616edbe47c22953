pub mod credentials;
pub mod error;
pub mod sync;

pub use credentials::*;
pub use error::*;
pub use sync::*;
