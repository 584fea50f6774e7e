//! Workflow executor
//!
//! Runs the allow-list and subscription workflows for one wallet. Steps are
//! strictly ordered; the first failing step aborts the remaining steps and
//! iterations of that invocation.

use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{error, info};

use super::types::{Receipt, WorkflowKind, WorkflowParams, WorkflowResult};
use crate::config::LedgerConfig;
use crate::error::{Error, Result};
use crate::ledger::{CallArg, ExecutionEffects, Ledger, MoveCall};
use crate::storage::{BlobId, BlobStore, PayloadLoader, PayloadSource};
use crate::wallet::WalletKey;

const ADJECTIVES: &[&str] = &["cool", "awesome", "amazing", "brilliant", "excellent"];
const NOUNS: &[&str] = &["project", "creation", "work", "masterpiece", "innovation"];

/// Random `adjective-noun-N` entry name
pub fn random_entry_name() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "{}-{}-{}",
        ADJECTIVES.choose(&mut rng).copied().unwrap_or("cool"),
        NOUNS.choose(&mut rng).copied().unwrap_or("project"),
        rng.gen_range(0..1000)
    )
}

/// Move call parameters for both workflows
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub gas_budget: u64,
    pub subscription_amount: u64,
    pub subscription_duration: u64,
}

impl From<&LedgerConfig> for WorkflowSettings {
    fn from(config: &LedgerConfig) -> Self {
        Self {
            gas_budget: config.gas_budget,
            subscription_amount: config.subscription_amount,
            subscription_duration: config.subscription_duration,
        }
    }
}

/// Runs one workflow invocation for one wallet
#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    async fn run_workflow(
        &self,
        key: &WalletKey,
        kind: WorkflowKind,
        params: &WorkflowParams,
    ) -> WorkflowResult;
}

pub struct WorkflowExecutor {
    ledger: Arc<dyn Ledger>,
    blobs: Arc<dyn BlobStore>,
    payloads: Arc<PayloadLoader>,
    settings: WorkflowSettings,
}

impl WorkflowExecutor {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        blobs: Arc<dyn BlobStore>,
        payloads: Arc<PayloadLoader>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            ledger,
            blobs,
            payloads,
            settings,
        }
    }

    /// Run `params.count` iterations of `kind` for `key`.
    ///
    /// Never returns an error: a failure is captured in the result alongside
    /// the receipts of the iterations that completed before it.
    pub async fn run(
        &self,
        key: &WalletKey,
        kind: WorkflowKind,
        params: &WorkflowParams,
    ) -> WorkflowResult {
        let count = params.count.max(1);
        info!("Starting {} workflow for {} iteration(s)", kind, count);

        let source = self.payloads.resolve(&params.image).await;
        let mut result = WorkflowResult {
            kind,
            receipts: Vec::new(),
            error: None,
        };

        for i in 1..=count {
            info!("Processing {} {} of {}", kind, i, count);
            let iteration = match kind {
                WorkflowKind::Allowlist => {
                    self.allowlist_iteration(key, &source, &params.extra_identities)
                        .await
                }
                WorkflowKind::Subscription => self.subscription_iteration(key, &source).await,
            };

            match iteration {
                Ok(receipt) => result.receipts.push(receipt),
                Err(e) => {
                    error!("{} workflow failed: {}", kind, e);
                    result.error = Some(e);
                    return result;
                }
            }
        }

        info!("{} workflow completed successfully", kind);
        result
    }

    async fn allowlist_iteration(
        &self,
        key: &WalletKey,
        source: &PayloadSource,
        extra_identities: &[String],
    ) -> Result<Receipt> {
        let name = random_entry_name();
        info!("Creating allowlist with name: {}", name);
        let effects = self
            .execute(
                key,
                self.call("allowlist", "create_allowlist_entry")
                    .arg(CallArg::Str(name)),
            )
            .await?;
        let (allowlist_id, entry_id) = created_pair(key, &effects, "allowlist")?;

        let members = std::iter::once(key.identity().as_str().to_string())
            .chain(extra_identities.iter().cloned());
        for member in members {
            info!("Adding {} to allowlist", member);
            self.execute(
                key,
                self.call("allowlist", "add")
                    .arg(CallArg::Object(allowlist_id.clone()))
                    .arg(CallArg::Object(entry_id.clone()))
                    .arg(CallArg::Address(member)),
            )
            .await?;
        }

        let blob_id = self.upload(source).await?;

        info!("Publishing blob to allowlist");
        self.execute(
            key,
            self.call("allowlist", "publish")
                .arg(CallArg::Object(allowlist_id.clone()))
                .arg(CallArg::Object(entry_id.clone()))
                .arg(CallArg::Str(blob_id.to_string())),
        )
        .await?;

        Ok(Receipt::Allowlist {
            allowlist_id,
            entry_id,
            blob_id,
        })
    }

    async fn subscription_iteration(
        &self,
        key: &WalletKey,
        source: &PayloadSource,
    ) -> Result<Receipt> {
        let name = random_entry_name();
        info!(
            "Adding service entry: {} (Amount: {}, Duration: {})",
            name, self.settings.subscription_amount, self.settings.subscription_duration
        );
        let effects = self
            .execute(
                key,
                self.call("subscription", "create_service_entry")
                    .arg(CallArg::U64(self.settings.subscription_amount))
                    .arg(CallArg::U64(self.settings.subscription_duration))
                    .arg(CallArg::Str(name)),
            )
            .await?;
        let (service_id, entry_id) = created_pair(key, &effects, "service")?;

        let blob_id = self.upload(source).await?;

        info!("Publishing blob to subscription service");
        self.execute(
            key,
            self.call("subscription", "publish")
                .arg(CallArg::Object(service_id.clone()))
                .arg(CallArg::Object(entry_id.clone()))
                .arg(CallArg::Str(blob_id.to_string())),
        )
        .await?;

        Ok(Receipt::Subscription {
            service_id,
            entry_id,
            blob_id,
        })
    }

    fn call(&self, module: &'static str, function: &'static str) -> MoveCall {
        MoveCall::new(module, function, self.settings.gas_budget)
    }

    async fn execute(&self, key: &WalletKey, call: MoveCall) -> Result<ExecutionEffects> {
        self.ledger.execute(key, &call).await
    }

    async fn upload(&self, source: &PayloadSource) -> Result<BlobId> {
        let payload = self.payloads.load(source).await?;
        self.blobs.store(&payload).await
    }
}

#[async_trait]
impl WorkflowRunner for WorkflowExecutor {
    async fn run_workflow(
        &self,
        key: &WalletKey,
        kind: WorkflowKind,
        params: &WorkflowParams,
    ) -> WorkflowResult {
        self.run(key, kind, params).await
    }
}

/// (shared object, wallet-owned entry) created by a create call
fn created_pair(
    key: &WalletKey,
    effects: &ExecutionEffects,
    what: &str,
) -> Result<(String, String)> {
    let entry = effects.owned_by(key.identity()).ok_or_else(|| {
        Error::UnexpectedEffects(format!("{}: no entry object owned by the wallet", effects.digest))
    })?;
    let shared = effects.shared().ok_or_else(|| {
        Error::UnexpectedEffects(format!("{}: no shared {} object", effects.digest, what))
    })?;
    info!("Created {} {} with entry {}", what, shared, entry);
    Ok((shared.to_string(), entry.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{CreatedObject, ObjectOwner};
    use crate::proxy::ProxyRotator;
    use crate::storage::ImageChoice;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every call; create calls produce an owned entry plus a shared object
    #[derive(Default)]
    struct FakeLedger {
        calls: Mutex<Vec<MoveCall>>,
        /// 1-based call number that aborts
        fail_at_call: Option<usize>,
        skip_shared: bool,
    }

    impl FakeLedger {
        fn targets(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|c| c.target()).collect()
        }
    }

    #[async_trait]
    impl Ledger for FakeLedger {
        async fn execute(&self, key: &WalletKey, call: &MoveCall) -> Result<ExecutionEffects> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(call.clone());
                calls.len()
            };
            if self.fail_at_call == Some(n) {
                return Err(Error::TransactionFailed(format!("{} aborted", call.target())));
            }

            let mut created = Vec::new();
            if call.function.starts_with("create") {
                created.push(CreatedObject {
                    object_id: format!("0xentry{}", n),
                    owner: ObjectOwner::AddressOwner(key.identity().as_str().to_string()),
                });
                if !self.skip_shared {
                    created.push(CreatedObject {
                        object_id: format!("0xshared{}", n),
                        owner: ObjectOwner::Shared {
                            initial_shared_version: Some(1),
                        },
                    });
                }
            }
            Ok(ExecutionEffects {
                digest: format!("tx{}", n),
                created,
            })
        }
    }

    struct FakeBlobs {
        uploads: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl BlobStore for FakeBlobs {
        async fn store(&self, payload: &[u8]) -> Result<BlobId> {
            assert!(!payload.is_empty());
            let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(Error::UploadExhausted { attempts: 15 });
            }
            Ok(BlobId(format!("blob{}", n)))
        }
    }

    fn executor(ledger: Arc<FakeLedger>, fail_upload: bool) -> (WorkflowExecutor, Arc<FakeBlobs>) {
        let blobs = Arc::new(FakeBlobs {
            uploads: AtomicU32::new(0),
            fail: fail_upload,
        });
        let payloads = Arc::new(PayloadLoader::new(
            Arc::new(ProxyRotator::default()),
            None,
            Duration::from_millis(10),
            "https://example.invalid/default.jpg".to_string(),
        ));
        let settings = WorkflowSettings::from(&LedgerConfig::default());
        (
            WorkflowExecutor::new(ledger, blobs.clone(), payloads, settings),
            blobs,
        )
    }

    fn params(count: u32) -> WorkflowParams {
        WorkflowParams {
            image: ImageChoice::Bytes(vec![0xFF, 0xD8]),
            extra_identities: vec!["0xfriend".to_string()],
            count,
        }
    }

    #[tokio::test]
    async fn test_allowlist_step_order() {
        let ledger = Arc::new(FakeLedger::default());
        let (executor, _) = executor(ledger.clone(), false);
        let key = WalletKey::from_secret(&[1u8; 32]);

        let result = executor.run(&key, WorkflowKind::Allowlist, &params(1)).await;

        assert!(result.succeeded());
        assert_eq!(
            ledger.targets(),
            vec![
                "allowlist::create_allowlist_entry",
                "allowlist::add",
                "allowlist::add",
                "allowlist::publish",
            ]
        );

        let calls = ledger.calls.lock().unwrap();
        assert_eq!(
            calls[1].arguments[2],
            CallArg::Address(key.identity().as_str().to_string())
        );
        assert_eq!(calls[2].arguments[2], CallArg::Address("0xfriend".to_string()));
        assert_eq!(calls[3].arguments[2], CallArg::Str("blob1".to_string()));
        assert!(calls.iter().all(|c| c.gas_budget == 10_000_000));

        assert_eq!(
            result.receipts,
            vec![Receipt::Allowlist {
                allowlist_id: "0xshared1".to_string(),
                entry_id: "0xentry1".to_string(),
                blob_id: BlobId("blob1".to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn test_subscription_uses_configured_amounts() {
        let ledger = Arc::new(FakeLedger::default());
        let (executor, _) = executor(ledger.clone(), false);
        let key = WalletKey::from_secret(&[2u8; 32]);

        let result = executor
            .run(&key, WorkflowKind::Subscription, &params(2))
            .await;

        assert!(result.succeeded());
        assert_eq!(result.receipts.len(), 2);
        let calls = ledger.calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0].arguments[0], CallArg::U64(10));
        assert_eq!(calls[0].arguments[1], CallArg::U64(60_000_000));
        assert_eq!(calls[1].target(), "subscription::publish");
    }

    #[tokio::test]
    async fn test_failure_stops_remaining_steps_and_iterations() {
        let ledger = Arc::new(FakeLedger::default());
        let (executor, blobs) = executor(ledger.clone(), true);
        let key = WalletKey::from_secret(&[3u8; 32]);

        let result = executor
            .run(&key, WorkflowKind::Subscription, &params(3))
            .await;

        assert!(matches!(
            result.error,
            Some(Error::UploadExhausted { attempts: 15 })
        ));
        assert!(result.receipts.is_empty());
        // create ran, publish never did, no second iteration
        assert_eq!(ledger.targets(), vec!["subscription::create_service_entry"]);
        assert_eq!(blobs.uploads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_later_iteration_failure_keeps_receipts() {
        // one allow-list iteration is four calls; the fifth is the second create
        let ledger = Arc::new(FakeLedger {
            fail_at_call: Some(5),
            ..Default::default()
        });
        let (executor, _) = executor(ledger.clone(), false);
        let key = WalletKey::from_secret(&[4u8; 32]);

        let result = executor.run(&key, WorkflowKind::Allowlist, &params(3)).await;

        assert!(matches!(result.error, Some(Error::TransactionFailed(_))));
        assert_eq!(result.receipts.len(), 1);
        assert_eq!(ledger.targets().len(), 5);
    }

    #[tokio::test]
    async fn test_missing_shared_object_is_fatal_for_invocation() {
        let ledger = Arc::new(FakeLedger {
            skip_shared: true,
            ..Default::default()
        });
        let (executor, _) = executor(ledger.clone(), false);
        let key = WalletKey::from_secret(&[5u8; 32]);

        let result = executor.run(&key, WorkflowKind::Allowlist, &params(1)).await;

        assert!(matches!(result.error, Some(Error::UnexpectedEffects(_))));
        assert_eq!(ledger.targets().len(), 1);
    }

    #[test]
    fn test_random_entry_name_shape() {
        let name = random_entry_name();
        let parts: Vec<&str> = name.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert!(ADJECTIVES.contains(&parts[0]));
        assert!(NOUNS.contains(&parts[1]));
        assert!(parts[2].parse::<u32>().unwrap() < 1000);
    }
}
