//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use crate::scheduler::config::ScheduleConfig;
use crate::storage::payload::ImageMode;
use crate::workflow::types::TaskSelection;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Timeout for the startup connectivity probe
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Move package and call parameters
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_package_id")]
    pub package_id: String,
    /// Gas budget attached to every Move call (MIST)
    #[serde(default = "default_gas_budget")]
    pub gas_budget: u64,
    #[serde(default = "default_subscription_amount")]
    pub subscription_amount: u64,
    /// Subscription duration (ms)
    #[serde(default = "default_subscription_duration")]
    pub subscription_duration: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Interchangeable publisher endpoints (`.../v1/blobs`)
    #[serde(default = "default_publisher_urls")]
    pub publisher_urls: Vec<String>,
    #[serde(default = "default_epochs")]
    pub epochs: u32,
    #[serde(default = "default_upload_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_upload_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_image_url")]
    pub default_image_url: String,
    #[serde(default = "default_image_probe_timeout_ms")]
    pub image_probe_timeout_ms: u64,
}

/// Files read and written by the runner
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_proxies_path")]
    pub proxies: PathBuf,
    #[serde(default = "default_wallets_path")]
    pub wallets: PathBuf,
    /// Single-credential file (whole content is one key or phrase)
    #[serde(default = "default_private_key_path")]
    pub private_key: PathBuf,
    #[serde(default = "default_failed_wallets_path")]
    pub failed_wallets: PathBuf,
    #[serde(default = "default_schedule_path")]
    pub schedule: PathBuf,
    #[serde(default = "default_lock_path")]
    pub lock: PathBuf,
    #[serde(default = "default_local_image_path")]
    pub local_image: PathBuf,
}

/// Non-interactive defaults used by scheduled runs
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    #[serde(default)]
    pub task: TaskSelection,
    #[serde(default)]
    pub image: ImageMode,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default)]
    pub extra_addresses: Vec<String>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: default_rpc_endpoint(),
            timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            package_id: default_package_id(),
            gas_budget: default_gas_budget(),
            subscription_amount: default_subscription_amount(),
            subscription_duration: default_subscription_duration(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            publisher_urls: default_publisher_urls(),
            epochs: default_epochs(),
            max_attempts: default_upload_max_attempts(),
            retry_delay_ms: default_upload_retry_delay_ms(),
            default_image_url: default_image_url(),
            image_probe_timeout_ms: default_image_probe_timeout_ms(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            proxies: default_proxies_path(),
            wallets: default_wallets_path(),
            private_key: default_private_key_path(),
            failed_wallets: default_failed_wallets_path(),
            schedule: default_schedule_path(),
            lock: default_lock_path(),
            local_image: default_local_image_path(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            task: TaskSelection::default(),
            image: ImageMode::default(),
            count: default_count(),
            extra_addresses: Vec::new(),
        }
    }
}

impl StorageConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn image_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.image_probe_timeout_ms)
    }
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

// Default value functions
fn default_rpc_endpoint() -> String {
    std::env::var("SUI_RPC_URL").unwrap_or_else(|_| "https://fullnode.testnet.sui.io:443".into())
}

fn default_timeout_ms() -> u64 {
    30000
}

fn default_connect_timeout_ms() -> u64 {
    10000
}

fn default_package_id() -> String {
    "0x4cb081457b1e098d566a277f605ba48410e26e66eaab5b3be4f6c560e9501800".into()
}

fn default_gas_budget() -> u64 {
    10_000_000
}

fn default_subscription_amount() -> u64 {
    10
}

fn default_subscription_duration() -> u64 {
    60_000_000
}

fn default_publisher_urls() -> Vec<String> {
    (1..=6)
        .map(|i| format!("https://seal-example.vercel.app/publisher{}/v1/blobs", i))
        .collect()
}

fn default_epochs() -> u32 {
    1
}

fn default_upload_max_attempts() -> u32 {
    15
}

fn default_upload_retry_delay_ms() -> u64 {
    5000
}

fn default_image_url() -> String {
    "https://picsum.photos/800/600".into()
}

fn default_image_probe_timeout_ms() -> u64 {
    5000
}

fn default_proxies_path() -> PathBuf {
    PathBuf::from("proxies.txt")
}

fn default_wallets_path() -> PathBuf {
    PathBuf::from("wallets.txt")
}

fn default_private_key_path() -> PathBuf {
    PathBuf::from("private_key.txt")
}

fn default_failed_wallets_path() -> PathBuf {
    PathBuf::from("failed_wallets.txt")
}

fn default_schedule_path() -> PathBuf {
    PathBuf::from("schedule-config.json")
}

fn default_lock_path() -> PathBuf {
    PathBuf::from(".seal-runner.lock")
}

fn default_local_image_path() -> PathBuf {
    PathBuf::from("image.jpg")
}

fn default_count() -> u32 {
    1
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("rpc.endpoint", default_rpc_endpoint())?
            .set_default("rpc.timeout_ms", default_timeout_ms() as i64)?
            .set_default("storage.max_attempts", default_upload_max_attempts() as i64)?
            .set_default("storage.retry_delay_ms", default_upload_retry_delay_ms() as i64)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix SEAL_)
            .add_source(
                config::Environment::with_prefix("SEAL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.storage.publisher_urls.is_empty() {
            anyhow::bail!("At least one publisher URL is required");
        }

        for publisher in &self.storage.publisher_urls {
            let parsed = url::Url::parse(publisher)
                .with_context(|| format!("Invalid publisher URL: {}", publisher))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                anyhow::bail!("Publisher URL must be http(s): {}", publisher);
            }
        }

        if self.storage.max_attempts == 0 {
            anyhow::bail!("storage.max_attempts must be at least 1");
        }

        if self.storage.epochs == 0 {
            anyhow::bail!("storage.epochs must be at least 1");
        }

        if self.ledger.gas_budget == 0 {
            anyhow::bail!("ledger.gas_budget must be positive");
        }

        if !self.ledger.package_id.starts_with("0x") {
            anyhow::bail!("ledger.package_id must be a 0x-prefixed object id");
        }

        if self.batch.count == 0 {
            anyhow::bail!("batch.count must be at least 1");
        }

        url::Url::parse(&self.rpc.endpoint)
            .with_context(|| format!("Invalid RPC endpoint: {}", self.rpc.endpoint))?;

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  RPC:
    endpoint: {}
    timeout: {}ms
  Ledger:
    package: {}
    gas_budget: {}
    subscription: amount={} duration={}ms
  Storage:
    publishers: {}
    epochs: {}
    upload attempts: {} (delay {}ms)
    default image: {}
  Files:
    proxies: {}
    wallets: {}
    private key: {}
    failed wallets: {}
    schedule: {}
  Scheduled batch:
    task: {}
    image: {:?}
    count: {}
    extra addresses: {}
"#,
            mask_url(&self.rpc.endpoint),
            self.rpc.timeout_ms,
            self.ledger.package_id,
            self.ledger.gas_budget,
            self.ledger.subscription_amount,
            self.ledger.subscription_duration,
            self.storage.publisher_urls.len(),
            self.storage.epochs,
            self.storage.max_attempts,
            self.storage.retry_delay_ms,
            self.storage.default_image_url,
            self.paths.proxies.display(),
            self.paths.wallets.display(),
            self.paths.private_key.display(),
            self.paths.failed_wallets.display(),
            self.paths.schedule.display(),
            self.batch.task,
            self.batch.image,
            self.batch.count,
            self.batch.extra_addresses.len(),
        )
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.storage.publisher_urls.len(), 6);
        assert_eq!(config.storage.max_attempts, 15);
        assert_eq!(config.storage.retry_delay(), Duration::from_secs(5));
        assert_eq!(config.ledger.gas_budget, 10_000_000);
        assert_eq!(config.batch.task, TaskSelection::Both);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[storage]
publisher_urls = ["https://publisher.example/v1/blobs"]
max_attempts = 3

[batch]
task = "subscription"
count = 2
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.storage.publisher_urls.len(), 1);
        assert_eq!(config.storage.max_attempts, 3);
        assert_eq!(config.storage.epochs, 1);
        assert_eq!(config.batch.task, TaskSelection::Subscription);
        assert_eq!(config.batch.count, 2);
    }

    #[test]
    fn test_validate_rejects_bad_publisher() {
        let mut config = Config::default();
        config.storage.publisher_urls = vec!["ftp://nope".to_string()];
        assert!(config.validate().is_err());

        config.storage.publisher_urls.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("https://api.example.com?key=secret"),
            "https://api.example.com?***"
        );
        assert_eq!(
            mask_url("https://api.example.com"),
            "https://api.example.com"
        );
    }
}
