//! Scheduled retry driver
//!
//! Each cron firing runs the batch in-process and, on failure, retries it
//! after a fixed delay. Which wallets to retry comes only from the
//! orchestrator's failed-units file: a non-empty file means a targeted
//! retry, no file means a blind retry of the full batch. A run that stopped
//! before the batch recorded its failures is repeated as it was.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use tracing::{error, info, warn};

use super::config::ScheduleConfig;
use super::lock::RunLock;
use crate::batch::{FailedUnitSet, FailedUnitStore};
use crate::error::{Error, Result};
use crate::wallet::WalletIdentity;

/// Which wallets a run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Full,
    /// Only wallets listed in the failed-units file
    RetryFailed,
}

/// Structured result of one in-process batch run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    /// The batch completed but some wallets failed
    Failed { failed: usize },
    /// The run could not complete for a transient reason
    Retryable(String),
    /// Retrying cannot help (no credentials, bad configuration)
    Fatal(String),
}

/// Runs one batch. The driver holds the run lock while calling this.
#[async_trait]
pub trait BatchRunner: Send + Sync {
    async fn run(&self, mode: RunMode) -> RunOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Running,
    Succeeded,
    /// Chain ended with this many wallets still failing
    Failed(usize),
}

pub struct RetryDriver {
    runner: Arc<dyn BatchRunner>,
    store: FailedUnitStore,
    config: ScheduleConfig,
    lock_path: PathBuf,
    state: DriverState,
}

impl RetryDriver {
    pub fn new(
        runner: Arc<dyn BatchRunner>,
        store: FailedUnitStore,
        config: ScheduleConfig,
        lock_path: PathBuf,
    ) -> Self {
        Self {
            runner,
            store,
            config,
            lock_path,
            state: DriverState::Idle,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Fire on every cron tick, forever. With `run_now`, fire once first.
    pub async fn run_forever(&mut self, run_now: bool) -> Result<()> {
        if run_now {
            info!("Running immediately");
            self.fire().await;
        }

        loop {
            let now = Local::now();
            let next = self.config.next_firing(&now)?.ok_or_else(|| Error::InvalidSchedule {
                expr: self.config.schedule.clone(),
                reason: "no upcoming firing".to_string(),
            })?;
            info!("Next scheduled run at {}", next.format("%Y-%m-%d %H:%M:%S"));

            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;
            self.fire().await;
        }
    }

    async fn fire(&mut self) {
        match self.run_firing().await {
            Ok(_) => {}
            Err(Error::RunInProgress(lock)) => {
                warn!("Previous run still in progress ({}). Skipping this firing.", lock)
            }
            Err(e) => error!("Scheduled task error: {}", e),
        }

        match self.state() {
            DriverState::Succeeded => info!("Scheduled task completed successfully"),
            DriverState::Failed(remaining) => {
                warn!("Scheduled task ended with {} wallet(s) still failing", remaining)
            }
            DriverState::Idle | DriverState::Running => {}
        }
        self.state = DriverState::Idle;
    }

    /// One firing: the initial full run plus up to `max_retries` retries.
    ///
    /// Fails with [`Error::RunInProgress`] without running anything when
    /// another run holds the lock.
    pub async fn run_firing(&mut self) -> Result<DriverState> {
        let _lock = RunLock::try_acquire(&self.lock_path)?;

        let mut retried: HashMap<WalletIdentity, u32> = HashMap::new();
        let mut mode = RunMode::Full;
        let mut retries = 0u32;

        loop {
            self.state = DriverState::Running;
            info!(
                "Running scheduled task (attempt {}/{}, {:?})",
                retries + 1,
                self.config.max_retries + 1,
                mode
            );

            let recorded = match self.runner.run(mode).await {
                RunOutcome::Succeeded => {
                    self.store.clear().await?;
                    self.state = DriverState::Succeeded;
                    return Ok(self.state);
                }
                RunOutcome::Fatal(reason) => {
                    error!("Scheduled task failed fatally: {}", reason);
                    let remaining = self.store.load().await?.len();
                    self.state = DriverState::Failed(remaining);
                    return Ok(self.state);
                }
                RunOutcome::Failed { failed } => {
                    warn!("Scheduled task finished with {} failed wallet(s)", failed);
                    true
                }
                RunOutcome::Retryable(reason) => {
                    warn!("Scheduled task failed: {}", reason);
                    false
                }
            };

            let mut failed = self.store.load().await?;
            self.state = DriverState::Failed(failed.len());

            if retries >= self.config.max_retries {
                error!(
                    "Max retries ({}) reached. Waiting for next scheduled run.",
                    self.config.max_retries
                );
                return Ok(self.state);
            }

            // the file only reflects this run when the batch got as far as recording failures
            if recorded {
                mode = if failed.is_empty() {
                    info!("No failed-units file found. Retrying the full batch.");
                    RunMode::Full
                } else {
                    RunMode::RetryFailed
                };
            } else {
                info!("Run stopped before recording failures. Repeating the {:?} run.", mode);
            }

            if mode == RunMode::RetryFailed {
                if let Some(limit) = self.config.wallet_retry_limit {
                    let before = failed.len();
                    failed = exclude_exhausted(&failed, &retried, limit);
                    if failed.len() < before {
                        warn!(
                            "{} wallet(s) reached the retry limit of {} and were dropped",
                            before - failed.len(),
                            limit
                        );
                        self.store.persist(&failed).await?;
                        if failed.is_empty() {
                            return Ok(self.state);
                        }
                    }
                }

                info!("Retrying {} failed wallet(s)", failed.len());
                for identity in failed.iter() {
                    *retried.entry(identity.clone()).or_insert(0) += 1;
                }
            }

            retries += 1;
            warn!(
                "Retrying in {:.1} minutes...",
                self.config.retry_delay().as_secs_f64() / 60.0
            );
            tokio::time::sleep(self.config.retry_delay()).await;
        }
    }
}

fn exclude_exhausted(
    failed: &FailedUnitSet,
    retried: &HashMap<WalletIdentity, u32>,
    limit: u32,
) -> FailedUnitSet {
    failed
        .iter()
        .filter(|id| retried.get(*id).copied().unwrap_or(0) < limit)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    /// Plays back outcomes, rewriting the failed-units file like the orchestrator would
    struct ScriptedRunner {
        script: Mutex<VecDeque<(RunOutcome, Vec<&'static str>)>>,
        store: FailedUnitStore,
        modes: Mutex<Vec<RunMode>>,
    }

    impl ScriptedRunner {
        fn new(store: FailedUnitStore, script: Vec<(RunOutcome, Vec<&'static str>)>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                store,
                modes: Mutex::new(Vec::new()),
            }
        }

        fn modes(&self) -> Vec<RunMode> {
            self.modes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BatchRunner for ScriptedRunner {
        async fn run(&self, mode: RunMode) -> RunOutcome {
            self.modes.lock().unwrap().push(mode);
            let next = self.script.lock().unwrap().pop_front();
            let (outcome, failed) = next.unwrap_or((RunOutcome::Succeeded, Vec::new()));
            if !matches!(outcome, RunOutcome::Retryable(_) | RunOutcome::Fatal(_)) {
                let set: FailedUnitSet = failed.into_iter().map(WalletIdentity::new).collect();
                self.store.persist(&set).await.unwrap();
            }
            outcome
        }
    }

    fn schedule(max_retries: u32, wallet_retry_limit: Option<u32>) -> ScheduleConfig {
        ScheduleConfig {
            schedule: "0 6 * * *".to_string(),
            max_retries,
            retry_delay_ms: 60_000,
            wallet_retry_limit,
        }
    }

    fn setup(
        config: ScheduleConfig,
        script: Vec<(RunOutcome, Vec<&'static str>)>,
    ) -> (TempDir, Arc<ScriptedRunner>, RetryDriver) {
        let dir = tempdir().unwrap();
        let store = FailedUnitStore::new(dir.path().join("failed_wallets.txt"));
        let runner = Arc::new(ScriptedRunner::new(store.clone(), script));
        let driver = RetryDriver::new(
            runner.clone(),
            store,
            config,
            dir.path().join(".seal-runner.lock"),
        );
        (dir, runner, driver)
    }

    fn failed(n: usize) -> RunOutcome {
        RunOutcome::Failed { failed: n }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_clears_file() {
        let (dir, runner, mut driver) = setup(schedule(3, None), vec![]);
        let path = dir.path().join("failed_wallets.txt");
        std::fs::write(&path, "0xold\n").unwrap();

        let state = driver.run_firing().await.unwrap();

        assert_eq!(state, DriverState::Succeeded);
        assert_eq!(runner.modes(), vec![RunMode::Full]);
        assert!(!path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_wallets_get_targeted_retry() {
        let (_dir, runner, mut driver) = setup(
            schedule(3, None),
            vec![(failed(2), vec!["0xaa", "0xbb"]), (RunOutcome::Succeeded, vec![])],
        );

        let start = tokio::time::Instant::now();
        let state = driver.run_firing().await.unwrap();

        assert_eq!(state, DriverState::Succeeded);
        assert_eq!(runner.modes(), vec![RunMode::Full, RunMode::RetryFailed]);
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_file_means_blind_retry() {
        let (_dir, runner, mut driver) = setup(
            schedule(3, None),
            vec![
                (RunOutcome::Retryable("ledger unreachable".to_string()), vec![]),
                (RunOutcome::Succeeded, vec![]),
            ],
        );

        driver.run_firing().await.unwrap();

        assert_eq!(runner.modes(), vec![RunMode::Full, RunMode::Full]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecorded_failure_ignores_stale_file() {
        let (dir, runner, mut driver) = setup(
            schedule(3, None),
            vec![
                (RunOutcome::Retryable("ledger unreachable".to_string()), vec![]),
                (RunOutcome::Succeeded, vec![]),
            ],
        );
        let path = dir.path().join("failed_wallets.txt");
        std::fs::write(&path, "0xold\n").unwrap();

        let state = driver.run_firing().await.unwrap();

        // the leftover file belongs to an earlier firing, so the full batch reruns
        assert_eq!(runner.modes(), vec![RunMode::Full, RunMode::Full]);
        assert_eq!(state, DriverState::Succeeded);
        assert!(!path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecorded_failure_keeps_targeted_mode() {
        let (_dir, runner, mut driver) = setup(
            schedule(3, None),
            vec![
                (failed(1), vec!["0xaa"]),
                (RunOutcome::Retryable("ledger unreachable".to_string()), vec![]),
                (RunOutcome::Succeeded, vec![]),
            ],
        );

        driver.run_firing().await.unwrap();

        assert_eq!(
            runner.modes(),
            vec![RunMode::Full, RunMode::RetryFailed, RunMode::RetryFailed]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let script = (0..10).map(|_| (failed(1), vec!["0xaa"])).collect();
        let (_dir, runner, mut driver) = setup(schedule(3, None), script);

        let start = tokio::time::Instant::now();
        let state = driver.run_firing().await.unwrap();

        assert_eq!(state, DriverState::Failed(1));
        assert_eq!(runner.modes().len(), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(180));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_ends_chain() {
        let (_dir, runner, mut driver) = setup(
            schedule(3, None),
            vec![(RunOutcome::Fatal("no credentials".to_string()), vec![])],
        );

        let state = driver.run_firing().await.unwrap();

        assert_eq!(state, DriverState::Failed(0));
        assert_eq!(runner.modes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wallet_retry_limit_narrows_chain() {
        let (dir, runner, mut driver) = setup(
            schedule(5, Some(1)),
            vec![
                (failed(2), vec!["0xaa", "0xbb"]),
                (failed(1), vec!["0xaa"]),
            ],
        );

        let state = driver.run_firing().await.unwrap();

        // 0xaa was already retried once, so nothing is left to retry
        assert_eq!(runner.modes(), vec![RunMode::Full, RunMode::RetryFailed]);
        assert_eq!(state, DriverState::Failed(1));
        assert!(!dir.path().join("failed_wallets.txt").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_lock_skips_firing() {
        let (dir, runner, mut driver) = setup(schedule(3, None), vec![]);
        let _held = RunLock::try_acquire(&dir.path().join(".seal-runner.lock")).unwrap();

        let result = driver.run_firing().await;

        assert!(matches!(result, Err(Error::RunInProgress(_))));
        assert!(runner.modes().is_empty());
    }

    #[test]
    fn test_exclude_exhausted() {
        let failed: FailedUnitSet = ["0xaa", "0xbb"].into_iter().map(WalletIdentity::new).collect();
        let mut retried = HashMap::new();
        retried.insert(WalletIdentity::new("0xaa"), 2);
        retried.insert(WalletIdentity::new("0xbb"), 1);

        let kept = exclude_exhausted(&failed, &retried, 2);

        assert_eq!(kept.len(), 1);
        assert!(kept.contains(&WalletIdentity::new("0xbb")));
    }
}
