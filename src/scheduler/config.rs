//! Schedule file (`schedule-config.json`)

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone, Timelike};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::{Error, Result};

/// Timer and retry settings for scheduled runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    /// Cron expression, 5 fields (`min hour dom mon dow`) or 6-7 with seconds
    #[serde(default = "default_schedule")]
    pub schedule: String,
    /// Retries after the initial run of a firing
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms", alias = "retryDelay")]
    pub retry_delay_ms: u64,
    /// Drop a wallet from the chain after this many targeted retries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_retry_limit: Option<u32>,
}

fn default_schedule() -> String {
    default_schedule_at(&Local::now())
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    300_000
}

/// Daily schedule one minute after `now`
pub fn default_schedule_at<Tz: TimeZone>(now: &DateTime<Tz>) -> String {
    let next = now.clone() + chrono::Duration::minutes(1);
    format!("{} {} * * *", next.minute(), next.hour())
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            schedule: default_schedule(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            wallet_retry_limit: None,
        }
    }
}

impl ScheduleConfig {
    /// Load the schedule file, creating it with defaults when absent.
    ///
    /// Values in the file override defaults key by key. An unreadable file
    /// falls back to defaults; an invalid cron expression is an error.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            match std::fs::read_to_string(path)
                .map_err(Error::from)
                .and_then(|s| serde_json::from_str::<ScheduleConfig>(&s).map_err(Error::from))
            {
                Ok(config) => {
                    info!("Loaded scheduler configuration");
                    config
                }
                Err(e) => {
                    error!("Error loading scheduler configuration: {}", e);
                    Self::default()
                }
            }
        } else {
            let config = Self::default();
            std::fs::write(path, serde_json::to_string_pretty(&config)?)?;
            info!(
                "Created default scheduler configuration ({}) at {}",
                config.schedule,
                path.display()
            );
            config
        };

        config.cron()?;
        Ok(config)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn cron(&self) -> Result<Schedule> {
        parse_schedule(&self.schedule)
    }

    /// Next firing strictly after `after`
    pub fn next_firing(&self, after: &DateTime<Local>) -> Result<Option<DateTime<Local>>> {
        Ok(self.cron()?.after(after).next())
    }
}

/// Parse a cron expression; 5-field expressions get a leading seconds field
pub fn parse_schedule(expr: &str) -> Result<Schedule> {
    let fields = expr.split_whitespace().count();
    let normalized = match fields {
        5 => format!("0 {}", expr.trim()),
        6 | 7 => expr.trim().to_string(),
        n => {
            return Err(Error::InvalidSchedule {
                expr: expr.to_string(),
                reason: format!("expected 5 to 7 fields, found {}", n),
            })
        }
    };

    Schedule::from_str(&normalized).map_err(|e| Error::InvalidSchedule {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}
