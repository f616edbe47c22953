pub mod client;
pub mod invoice;

pub use client::*;
pub use invoice::*;
