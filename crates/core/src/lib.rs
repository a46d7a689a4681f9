pub mod adapters;
pub mod auth;
pub mod callbacks;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod ports;
pub mod registry;
pub mod service;
pub mod strips;
pub mod types;

#[cfg(test)]
mod strips_tests;

pub use error::{SyncError, SyncResult};
pub use service::{Collaborators, WalletSync};
