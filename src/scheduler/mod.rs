//! Cron-driven batch runs with bounded retries

pub mod config;
pub mod driver;
pub mod lock;

pub use config::{parse_schedule, ScheduleConfig};
pub use driver::{BatchRunner, DriverState, RetryDriver, RunMode, RunOutcome};
pub use lock::RunLock;
