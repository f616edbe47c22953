pub mod client;
pub mod gateway;
pub mod retry;

pub use client::*;
pub use gateway::*;
pub use retry::*;
