//! Seal Runner Library
//!
//! Runs Sui allow-list and subscription workflows for a list of wallets,
//! uploading content blobs through a pool of publishers, and retries failed
//! wallets on a schedule.

pub mod batch;
pub mod cli;
pub mod config;
pub mod error;
pub mod ledger;
pub mod proxy;
pub mod scheduler;
pub mod storage;
pub mod wallet;
pub mod workflow;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
