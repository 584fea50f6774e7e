//! CLI command implementations

use anyhow::Result;
use async_trait::async_trait;
use dialoguer::{Input, Select};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::batch::{BatchOrchestrator, BatchReport, BatchRequest, FailedUnitStore};
use crate::config::{Config, ScheduleConfig};
use crate::error::Error;
use crate::ledger::{ChainProbe, SuiRpcLedger};
use crate::proxy::ProxyRotator;
use crate::scheduler::{BatchRunner, RetryDriver, RunLock, RunMode, RunOutcome};
use crate::storage::{
    BlobUploader, HttpPublisher, ImageChoice, ImageMode, PayloadLoader, PayloadSource,
    UploadPolicy,
};
use crate::wallet::{
    combine_credentials, load_credentials, load_single_credential, KeyResolver, SuiKeyResolver,
};
use crate::workflow::{TaskSelection, WorkflowExecutor, WorkflowParams, WorkflowSettings};

/// Options of the `run` command; unset values are prompted for or taken from config
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Non-interactive: missing choices come from the `[batch]` config section
    pub scheduled: bool,
    pub retry_failed: bool,
    pub task: Option<TaskSelection>,
    pub image_url: Option<String>,
    pub image_file: Option<PathBuf>,
    pub random_image: bool,
    pub count: Option<u32>,
    pub addresses: Vec<String>,
}

impl RunOptions {
    fn image_choice(&self) -> Option<ImageChoice> {
        match PayloadSource::from_parts(self.image_url.clone(), self.image_file.clone(), None) {
            Some(source) => Some(source.into()),
            None => self.random_image.then_some(ImageChoice::Random),
        }
    }
}

/// Wires the batch stack together and runs it, once per call
pub struct AppRunner {
    orchestrator: BatchOrchestrator,
    probe: Arc<dyn ChainProbe>,
    request: BatchRequest,
    wallets_path: PathBuf,
    private_key_path: PathBuf,
    probe_timeout: Duration,
}

impl AppRunner {
    pub fn build(config: &Config, request: BatchRequest) -> Result<Self> {
        let proxies = Arc::new(ProxyRotator::load_from_file(&config.paths.proxies));

        let ledger = Arc::new(SuiRpcLedger::new(
            config.rpc.endpoint.clone(),
            config.ledger.package_id.clone(),
            config.rpc.timeout(),
        )?);

        let uploader = BlobUploader::new(
            Arc::new(HttpPublisher::new(None)),
            config.storage.publisher_urls.clone(),
            proxies.clone(),
            UploadPolicy {
                epochs: config.storage.epochs,
                max_attempts: config.storage.max_attempts,
                fixed_delay: config.storage.retry_delay(),
            },
        )?;

        let payloads = Arc::new(PayloadLoader::new(
            proxies,
            Some(config.rpc.timeout()),
            config.storage.image_probe_timeout(),
            config.storage.default_image_url.clone(),
        ));

        let executor = WorkflowExecutor::new(
            ledger.clone(),
            Arc::new(uploader),
            payloads,
            WorkflowSettings::from(&config.ledger),
        );

        let orchestrator = BatchOrchestrator::new(
            Arc::new(SuiKeyResolver),
            Arc::new(executor),
            FailedUnitStore::new(&config.paths.failed_wallets),
        );

        Ok(Self::new(orchestrator, ledger, request, config))
    }

    /// Runner over an already wired orchestrator, reading credentials from `config.paths`
    pub fn new(
        orchestrator: BatchOrchestrator,
        probe: Arc<dyn ChainProbe>,
        request: BatchRequest,
        config: &Config,
    ) -> Self {
        Self {
            orchestrator,
            probe,
            request,
            wallets_path: config.paths.wallets.clone(),
            private_key_path: config.paths.private_key.clone(),
            probe_timeout: config.rpc.connect_timeout(),
        }
    }

    /// Load credentials, check the ledger and run one batch
    pub async fn execute(&self, mode: RunMode) -> crate::Result<BatchReport> {
        let credentials = combine_credentials(
            load_credentials(&self.wallets_path),
            load_single_credential(&self.private_key_path),
        )?;
        info!("Loaded {} wallet(s)", credentials.len());

        let chain = self.probe.chain_identifier(self.probe_timeout).await?;
        info!("Connected to {} (chain {})", self.probe.endpoint(), chain);

        let credentials = match mode {
            RunMode::Full => credentials,
            RunMode::RetryFailed => {
                let failed = self.orchestrator.store().load().await?;
                if failed.is_empty() {
                    info!("No failed wallets recorded. Nothing to retry.");
                    return Ok(BatchReport::default());
                }
                self.orchestrator.select_for_retry(&credentials, &failed)
            }
        };

        let report = self.orchestrator.run_batch(&credentials, &self.request).await?;
        report.print_summary();
        Ok(report)
    }
}

#[async_trait]
impl BatchRunner for AppRunner {
    async fn run(&self, mode: RunMode) -> RunOutcome {
        match self.execute(mode).await {
            Ok(report) if report.is_success() => RunOutcome::Succeeded,
            Ok(report) => RunOutcome::Failed {
                failed: report.failed.len(),
            },
            Err(e) if e.is_startup_fatal() => RunOutcome::Fatal(e.to_string()),
            Err(e) => RunOutcome::Retryable(e.to_string()),
        }
    }
}

/// Run one batch and return the process exit status
pub async fn run(config: &Config, options: RunOptions) -> Result<i32> {
    let _lock = match RunLock::try_acquire(&config.paths.lock) {
        Ok(lock) => lock,
        Err(Error::RunInProgress(path)) => {
            error!("Another run is in progress (lock {}). Exiting.", path);
            return Ok(1);
        }
        Err(e) => return Err(e.into()),
    };

    let request = build_request(config, &options)?;
    let runner = AppRunner::build(config, request)?;
    let mode = if options.retry_failed {
        RunMode::RetryFailed
    } else {
        RunMode::Full
    };

    match runner.execute(mode).await {
        Ok(report) => Ok(report.exit_code()),
        Err(e) => {
            error!("Run failed: {}", e);
            Ok(1)
        }
    }
}

/// Start the scheduler and keep firing until interrupted
pub async fn schedule(config: &Config, run_now: bool) -> Result<()> {
    let schedule = ScheduleConfig::load_or_create(&config.paths.schedule)?;
    let request = build_request(
        config,
        &RunOptions {
            scheduled: true,
            ..Default::default()
        },
    )?;
    let runner = Arc::new(AppRunner::build(config, request)?);

    println!("\n=== SCHEDULER ===\n");
    println!("Schedule:    {}", schedule.schedule);
    println!("Max retries: {}", schedule.max_retries);
    println!("Retry delay: {}ms", schedule.retry_delay_ms);
    if let Some(limit) = schedule.wallet_retry_limit {
        println!("Per-wallet retry limit: {}", limit);
    }
    println!();

    let mut driver = RetryDriver::new(
        runner,
        FailedUnitStore::new(&config.paths.failed_wallets),
        schedule,
        config.paths.lock.clone(),
    );

    tokio::select! {
        result = driver.run_forever(run_now) => result?,
        _ = tokio::signal::ctrl_c() => info!("Scheduler stopped"),
    }
    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Check RPC, publishers, proxies, wallets and the schedule file
pub async fn health(config: &Config) -> Result<()> {
    println!("\n=== SYSTEM HEALTH CHECK ===\n");

    let mut all_healthy = true;

    print!("RPC Endpoint... ");
    match check_rpc(config).await {
        Ok((chain, latency)) => println!("OK (chain {}, {}ms)", chain, latency),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    let proxies = ProxyRotator::load_from_file(&config.paths.proxies);
    if proxies.is_empty() {
        println!("Proxies... NONE (direct connections)");
    } else {
        println!("Proxies... {} loaded", proxies.len());
    }

    let client = proxies.http_client(Some(config.storage.image_probe_timeout()))?;
    for (i, publisher) in config.storage.publisher_urls.iter().enumerate() {
        print!("Publisher {}... ", i + 1);
        // any HTTP answer means the endpoint is up; only PUT is served
        match client.head(publisher).send().await {
            Ok(response) => println!("REACHABLE ({})", response.status()),
            Err(e) => {
                println!("UNREACHABLE: {}", e);
                all_healthy = false;
            }
        }
    }

    print!("Wallets... ");
    match combine_credentials(
        load_credentials(&config.paths.wallets),
        load_single_credential(&config.paths.private_key),
    ) {
        Ok(credentials) => {
            let resolved = credentials
                .iter()
                .filter(|c| SuiKeyResolver.resolve(c).is_ok())
                .count();
            println!("{} loaded, {} valid", credentials.len(), resolved);
            if resolved < credentials.len() {
                all_healthy = false;
            }
        }
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    print!("Failed wallets file... ");
    match FailedUnitStore::new(&config.paths.failed_wallets).load().await {
        Ok(failed) if failed.is_empty() => println!("NONE"),
        Ok(failed) => println!("{} wallet(s) pending retry", failed.len()),
        Err(e) => println!("UNREADABLE: {}", e),
    }

    print!("Schedule... ");
    if config.paths.schedule.exists() {
        match ScheduleConfig::load_or_create(&config.paths.schedule) {
            Ok(schedule) => println!("OK ({})", schedule.schedule),
            Err(e) => {
                println!("INVALID: {}", e);
                all_healthy = false;
            }
        }
    } else {
        println!("NOT CREATED (run `seal schedule` to create)");
    }

    println!();
    if all_healthy {
        println!("All systems healthy!");
    } else {
        println!("Some systems are unhealthy. Check the errors above.");
    }

    Ok(())
}

async fn check_rpc(config: &Config) -> Result<(String, u64)> {
    let ledger = SuiRpcLedger::new(
        config.rpc.endpoint.clone(),
        config.ledger.package_id.clone(),
        config.rpc.timeout(),
    )?;

    let start = Instant::now();
    let chain = ledger.chain_identifier(config.rpc.connect_timeout()).await?;
    Ok((chain, start.elapsed().as_millis() as u64))
}

/// Resolve every batch choice from flags, then prompts, then config
fn build_request(config: &Config, options: &RunOptions) -> Result<BatchRequest> {
    let interactive = !options.scheduled;

    let tasks = match options.task {
        Some(task) => task,
        None if interactive => prompt_task()?,
        None => config.batch.task,
    };

    let image = match options.image_choice() {
        Some(choice) => choice,
        None if interactive => prompt_image(config)?,
        None => match config.batch.image {
            ImageMode::Default => ImageChoice::Url(config.storage.default_image_url.clone()),
            ImageMode::Local => ImageChoice::Local(config.paths.local_image.clone()),
            ImageMode::Random => ImageChoice::Random,
        },
    };

    if let ImageChoice::Local(path) = &image {
        if !path.exists() {
            anyhow::bail!("Image file {} not found", path.display());
        }
    }

    let count = match options.count {
        Some(count) => count,
        None if interactive => Input::<u32>::new()
            .with_prompt("Number of tasks per wallet")
            .default(1)
            .interact_text()?,
        None => config.batch.count,
    }
    .max(1);

    let mut extra_identities = if !options.addresses.is_empty() {
        options.addresses.clone()
    } else if interactive && tasks != TaskSelection::Subscription {
        prompt_addresses()?
    } else {
        config.batch.extra_addresses.clone()
    };
    extra_identities.retain(|a| !a.trim().is_empty());
    if !extra_identities.is_empty() {
        info!(
            "Will add {} additional address(es) to each allowlist",
            extra_identities.len()
        );
    }

    info!("Task: {}, {} iteration(s) per wallet", tasks, count);
    Ok(BatchRequest {
        tasks,
        params: WorkflowParams {
            image,
            extra_identities,
            count,
        },
    })
}

fn prompt_task() -> Result<TaskSelection> {
    let items = [
        "Create Allowlist and Publish Blob",
        "Create Service Subscription and Upload Blob",
        "Run Both Tasks",
    ];
    let choice = Select::new()
        .with_prompt("Select an action")
        .items(&items)
        .default(2)
        .interact()?;

    Ok(match choice {
        0 => TaskSelection::Allowlist,
        1 => TaskSelection::Subscription,
        _ => TaskSelection::Both,
    })
}

fn prompt_image(config: &Config) -> Result<ImageChoice> {
    let items = [
        "Use URL",
        "Use local file",
        "Generate random image from API",
    ];
    let choice = Select::new()
        .with_prompt("Choose image source")
        .items(&items)
        .default(0)
        .interact()?;

    match choice {
        1 => {
            let path = config.paths.local_image.clone();
            if !path.exists() {
                anyhow::bail!("{} not found", path.display());
            }
            info!("Using local image {}", path.display());
            Ok(ImageChoice::Local(path))
        }
        2 => Ok(ImageChoice::Random),
        _ => {
            let url: String = Input::new()
                .with_prompt("Image URL (Enter for default)")
                .allow_empty(true)
                .interact_text()?;
            let url = if url.trim().is_empty() {
                config.storage.default_image_url.clone()
            } else {
                url.trim().to_string()
            };
            info!("Using image URL: {}", url);
            Ok(ImageChoice::Url(url))
        }
    }
}

fn prompt_addresses() -> Result<Vec<String>> {
    let input: String = Input::new()
        .with_prompt("Additional addresses for allowlist (comma-separated, Enter for none)")
        .allow_empty(true)
        .interact_text()?;

    let addresses: Vec<String> = input
        .split(',')
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();

    for address in &addresses {
        if !address.starts_with("0x") {
            warn!("Address {} does not look like a Sui address", address);
        }
    }
    Ok(addresses)
}
