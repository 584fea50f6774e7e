//! Batch orchestration over all wallets and failed-units persistence

pub mod failed;
pub mod orchestrator;

pub use failed::{FailedUnitSet, FailedUnitStore};
pub use orchestrator::{BatchOrchestrator, BatchReport, BatchRequest, WalletOutcome};
