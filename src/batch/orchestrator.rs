//! Batch orchestrator
//!
//! Walks every wallet in order, runs the selected workflows in isolation and
//! records which identities failed. Nothing a single wallet does can abort
//! the batch.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::failed::{FailedUnitSet, FailedUnitStore};
use crate::error::{Error, Result};
use crate::wallet::{KeyResolver, WalletIdentity};
use crate::workflow::{Receipt, TaskSelection, WorkflowParams, WorkflowResult, WorkflowRunner};

/// What to run for every wallet of a batch
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub tasks: TaskSelection,
    pub params: WorkflowParams,
}

/// Outcome for one wallet
#[derive(Debug)]
pub struct WalletOutcome {
    /// 1-based position in the credential list
    pub position: usize,
    pub identity: WalletIdentity,
    /// Set when the credential could not be turned into a key
    pub resolve_error: Option<Error>,
    pub results: Vec<WorkflowResult>,
}

impl WalletOutcome {
    /// True only if the key resolved and every selected workflow succeeded
    pub fn succeeded(&self) -> bool {
        self.resolve_error.is_none() && self.results.iter().all(WorkflowResult::succeeded)
    }
}

/// Aggregate result of one batch
#[derive(Debug, Default)]
pub struct BatchReport {
    pub wallets: Vec<WalletOutcome>,
    pub failed: FailedUnitSet,
}

impl BatchReport {
    pub fn succeeded_count(&self) -> usize {
        self.wallets.iter().filter(|w| w.succeeded()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Process exit status for this batch
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn print_summary(&self) {
        println!();
        println!("=== Batch Summary ===");
        println!("Wallets processed: {}", self.wallets.len());
        println!("Succeeded:         {}", self.succeeded_count());
        println!("Failed:            {}", self.failed.len());

        for wallet in &self.wallets {
            let status = if wallet.succeeded() { "OK" } else { "FAILED" };
            println!();
            println!("  [{}] Wallet {} {}", status, wallet.position, wallet.identity.short());
            if let Some(e) = &wallet.resolve_error {
                println!("    key: {}", e);
            }
            for result in &wallet.results {
                match &result.error {
                    None => println!(
                        "    {}: {} completed",
                        result.kind,
                        result.receipts.len()
                    ),
                    Some(e) => println!(
                        "    {}: {} completed, then failed: {}",
                        result.kind,
                        result.receipts.len(),
                        e
                    ),
                }
                for (i, receipt) in result.receipts.iter().enumerate() {
                    match receipt {
                        Receipt::Allowlist {
                            allowlist_id,
                            entry_id,
                            blob_id,
                        } => println!(
                            "      #{} allowlist {} entry {} blob {}",
                            i + 1,
                            allowlist_id,
                            entry_id,
                            blob_id
                        ),
                        Receipt::Subscription {
                            service_id,
                            entry_id,
                            blob_id,
                        } => println!(
                            "      #{} service {} entry {} blob {}",
                            i + 1,
                            service_id,
                            entry_id,
                            blob_id
                        ),
                    }
                }
            }
        }

        if !self.failed.is_empty() {
            println!();
            println!("Failed wallets:");
            for identity in self.failed.iter() {
                println!("  {}", identity);
            }
        }
    }
}

pub struct BatchOrchestrator {
    resolver: Arc<dyn KeyResolver>,
    workflows: Arc<dyn WorkflowRunner>,
    store: FailedUnitStore,
}

impl BatchOrchestrator {
    pub fn new(
        resolver: Arc<dyn KeyResolver>,
        workflows: Arc<dyn WorkflowRunner>,
        store: FailedUnitStore,
    ) -> Self {
        Self {
            resolver,
            workflows,
            store,
        }
    }

    pub fn store(&self) -> &FailedUnitStore {
        &self.store
    }

    /// Run `request` for every credential, strictly sequentially.
    ///
    /// The failed-units file is rewritten at the end: the failed set when
    /// non-empty, otherwise any stale file is removed.
    pub async fn run_batch(
        &self,
        credentials: &[String],
        request: &BatchRequest,
    ) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        info!(
            "Starting batch: {} wallet(s), task {}",
            credentials.len(),
            request.tasks
        );

        for (i, credential) in credentials.iter().enumerate() {
            let position = i + 1;
            let outcome = self.run_wallet(position, credential, request).await;
            if !outcome.succeeded() {
                report.failed.insert(outcome.identity.clone());
            }
            report.wallets.push(outcome);
        }

        self.store.persist(&report.failed).await?;

        if report.is_success() {
            info!("Batch finished: all {} wallet(s) succeeded", report.wallets.len());
        } else {
            warn!(
                "Batch finished: {} of {} wallet(s) failed",
                report.failed.len(),
                report.wallets.len()
            );
        }
        Ok(report)
    }

    async fn run_wallet(
        &self,
        position: usize,
        credential: &str,
        request: &BatchRequest,
    ) -> WalletOutcome {
        let key = match self.resolver.resolve(credential) {
            Ok(key) => key,
            Err(e) => {
                error!("Wallet {}: could not derive identity: {}", position, e);
                return WalletOutcome {
                    position,
                    identity: WalletIdentity::unresolved(position),
                    resolve_error: Some(e),
                    results: Vec::new(),
                };
            }
        };

        info!("Processing wallet {}: {}", position, key.identity());
        let mut results = Vec::new();
        for kind in request.tasks.kinds() {
            let result = self
                .workflows
                .run_workflow(&key, *kind, &request.params)
                .await;
            if let Some(e) = &result.error {
                error!("Wallet {} {} workflow failed: {}", key.identity().short(), kind, e);
            }
            results.push(result);
        }

        WalletOutcome {
            position,
            identity: key.identity().clone(),
            resolve_error: None,
            results,
        }
    }

    /// Credentials whose identity is in `failed`, in input order.
    ///
    /// Credentials that no longer resolve cannot be matched and are dropped.
    pub fn select_for_retry(&self, credentials: &[String], failed: &FailedUnitSet) -> Vec<String> {
        let mut selected = Vec::new();
        for (i, credential) in credentials.iter().enumerate() {
            match self.resolver.resolve(credential) {
                Ok(key) if failed.contains(key.identity()) => selected.push(credential.clone()),
                Ok(_) => {}
                Err(e) => warn!(
                    "Wallet {} could not be resolved and is excluded from retry: {}",
                    i + 1,
                    e
                ),
            }
        }

        info!(
            "Retrying {} of {} wallet(s) from the failed list",
            selected.len(),
            credentials.len()
        );
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ImageChoice;
    use crate::wallet::{SuiKeyResolver, WalletKey};
    use crate::workflow::WorkflowKind;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Fails every workflow of the listed identities (optionally one kind only)
    #[derive(Default)]
    struct FakeWorkflows {
        failing: HashSet<WalletIdentity>,
        failing_kind: Option<WorkflowKind>,
        runs: Mutex<Vec<(WalletIdentity, WorkflowKind)>>,
    }

    impl FakeWorkflows {
        fn failing(ids: &[WalletIdentity]) -> Self {
            Self {
                failing: ids.iter().cloned().collect(),
                ..Default::default()
            }
        }

        fn runs(&self) -> Vec<(WalletIdentity, WorkflowKind)> {
            self.runs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WorkflowRunner for FakeWorkflows {
        async fn run_workflow(
            &self,
            key: &WalletKey,
            kind: WorkflowKind,
            _params: &WorkflowParams,
        ) -> WorkflowResult {
            self.runs.lock().unwrap().push((key.identity().clone(), kind));
            let fails = self.failing.contains(key.identity())
                && self.failing_kind.map_or(true, |k| k == kind);
            WorkflowResult {
                kind,
                receipts: Vec::new(),
                error: fails.then(|| Error::TransactionFailed("aborted".to_string())),
            }
        }
    }

    fn credential(seed: u8) -> String {
        hex::encode([seed; 32])
    }

    fn identity(seed: u8) -> WalletIdentity {
        WalletKey::from_secret(&[seed; 32]).identity().clone()
    }

    fn request(tasks: TaskSelection) -> BatchRequest {
        BatchRequest {
            tasks,
            params: WorkflowParams::new(ImageChoice::Bytes(vec![1])),
        }
    }

    fn orchestrator(workflows: Arc<FakeWorkflows>, store: FailedUnitStore) -> BatchOrchestrator {
        BatchOrchestrator::new(Arc::new(SuiKeyResolver), workflows, store)
    }

    #[tokio::test]
    async fn test_failure_isolation() {
        let dir = tempdir().unwrap();
        let store = FailedUnitStore::new(dir.path().join("failed_wallets.txt"));
        let workflows = Arc::new(FakeWorkflows::failing(&[identity(2)]));
        let orchestrator = orchestrator(workflows.clone(), store.clone());
        let credentials = vec![credential(1), credential(2), credential(3)];

        let report = orchestrator
            .run_batch(&credentials, &request(TaskSelection::Both))
            .await
            .unwrap();

        // every wallet ran both workflows, including the failing one
        assert_eq!(workflows.runs().len(), 6);
        assert_eq!(report.succeeded_count(), 2);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(
            store.load().await.unwrap(),
            [identity(2)].into_iter().collect::<FailedUnitSet>()
        );
    }

    #[tokio::test]
    async fn test_one_failed_workflow_still_runs_the_other() {
        let dir = tempdir().unwrap();
        let store = FailedUnitStore::new(dir.path().join("failed_wallets.txt"));
        let workflows = Arc::new(FakeWorkflows {
            failing: [identity(1)].into_iter().collect(),
            failing_kind: Some(WorkflowKind::Allowlist),
            ..Default::default()
        });
        let orchestrator = orchestrator(workflows.clone(), store);

        let report = orchestrator
            .run_batch(&[credential(1)], &request(TaskSelection::Both))
            .await
            .unwrap();

        assert_eq!(
            workflows.runs(),
            vec![
                (identity(1), WorkflowKind::Allowlist),
                (identity(1), WorkflowKind::Subscription),
            ]
        );
        assert!(!report.wallets[0].succeeded());
        assert!(report.wallets[0].results[1].succeeded());
    }

    #[tokio::test]
    async fn test_success_removes_stale_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("failed_wallets.txt");
        std::fs::write(&path, "0xstale\n").unwrap();
        let orchestrator = orchestrator(Arc::new(FakeWorkflows::default()), FailedUnitStore::new(&path));

        let report = orchestrator
            .run_batch(&[credential(1), credential(2)], &request(TaskSelection::Allowlist))
            .await
            .unwrap();

        assert_eq!(report.exit_code(), 0);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_persistence_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("failed_wallets.txt");
        let credentials = vec![credential(1), credential(2), credential(3)];
        let workflows = Arc::new(FakeWorkflows::failing(&[identity(3), identity(1)]));
        let orchestrator = orchestrator(workflows, FailedUnitStore::new(&path));

        orchestrator
            .run_batch(&credentials, &request(TaskSelection::Subscription))
            .await
            .unwrap();
        let first = std::fs::read_to_string(&path).unwrap();

        orchestrator
            .run_batch(&credentials, &request(TaskSelection::Subscription))
            .await
            .unwrap();
        let second = std::fs::read_to_string(&path).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_unresolved_credential_recorded_by_position() {
        let dir = tempdir().unwrap();
        let store = FailedUnitStore::new(dir.path().join("failed_wallets.txt"));
        let workflows = Arc::new(FakeWorkflows::default());
        let orchestrator = orchestrator(workflows.clone(), store.clone());
        let credentials = vec![credential(1), "not a key".to_string(), credential(3)];

        let report = orchestrator
            .run_batch(&credentials, &request(TaskSelection::Allowlist))
            .await
            .unwrap();

        assert_eq!(workflows.runs().len(), 2);
        assert_eq!(report.succeeded_count(), 2);
        let failed = store.load().await.unwrap();
        assert!(failed.contains(&WalletIdentity::unresolved(2)));
        let content = std::fs::read_to_string(store.path()).unwrap();
        assert!(!content.contains("not a key"));
    }

    #[tokio::test]
    async fn test_targeted_retry_selects_failed_only() {
        let dir = tempdir().unwrap();
        let store = FailedUnitStore::new(dir.path().join("failed_wallets.txt"));
        let orchestrator = orchestrator(Arc::new(FakeWorkflows::default()), store);
        let credentials: Vec<String> = (1..=5).map(credential).collect();
        let failed: FailedUnitSet = [identity(4), identity(2)].into_iter().collect();

        let selected = orchestrator.select_for_retry(&credentials, &failed);

        assert_eq!(selected, vec![credential(2), credential(4)]);
    }

    #[tokio::test]
    async fn test_targeted_retry_skips_unresolvable() {
        let dir = tempdir().unwrap();
        let store = FailedUnitStore::new(dir.path().join("failed_wallets.txt"));
        let orchestrator = orchestrator(Arc::new(FakeWorkflows::default()), store);
        let credentials = vec!["garbage".to_string(), credential(1)];
        let failed: FailedUnitSet = [WalletIdentity::unresolved(1), identity(1)]
            .into_iter()
            .collect();

        let selected = orchestrator.select_for_retry(&credentials, &failed);

        assert_eq!(selected, vec![credential(1)]);
    }
}
