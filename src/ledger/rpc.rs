//! Sui fullnode JSON-RPC ledger
//!
//! Transactions are built by the fullnode (`unsafe_moveCall`), signed
//! locally with the wallet key and submitted with
//! `sui_executeTransactionBlock` in `WaitForLocalExecution` mode.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use super::{ChainProbe, CreatedObject, ExecutionEffects, Ledger, MoveCall, ObjectOwner};
use crate::error::{Error, Result};
use crate::wallet::WalletKey;

/// JSON-RPC client bound to one package
pub struct SuiRpcLedger {
    client: Client,
    endpoint: String,
    package_id: String,
}

impl SuiRpcLedger {
    pub fn new(endpoint: String, package_id: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build RPC client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            package_id,
        })
    }

    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self.client.post(&self.endpoint).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Rpc(format!("{} HTTP {}: {}", method, status, body)));
        }

        let body: RpcResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("{} response: {}", method, e)))?;
        body.into_result(method)
    }

    async fn call_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| Error::Serialization(format!("{} result: {}", method, e)))
    }
}

#[async_trait]
impl ChainProbe for SuiRpcLedger {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn chain_identifier(&self, timeout: Duration) -> Result<String> {
        let value = tokio::time::timeout(
            timeout,
            self.call("sui_getChainIdentifier", serde_json::json!([])),
        )
        .await
        .map_err(|_| {
            Error::RpcConnection(format!("no answer from {} within {:?}", self.endpoint, timeout))
        })??;

        match value {
            serde_json::Value::String(id) => Ok(id),
            other => Err(Error::Rpc(format!("unexpected chain identifier: {}", other))),
        }
    }
}

#[async_trait]
impl Ledger for SuiRpcLedger {
    async fn execute(&self, key: &WalletKey, call: &MoveCall) -> Result<ExecutionEffects> {
        debug!("Building {} for {}", call.target(), key.identity().short());

        let built: TransactionBytes = self
            .call_typed("unsafe_moveCall", move_call_params(key, &self.package_id, call))
            .await?;

        let tx_bytes = base64::Engine::decode(
            &base64::engine::general_purpose::STANDARD,
            &built.tx_bytes,
        )
        .map_err(|e| Error::Serialization(format!("txBytes: {}", e)))?;
        let signature = key.sign_transaction(&tx_bytes);

        let response: serde_json::Value = self
            .call(
                "sui_executeTransactionBlock",
                serde_json::json!([
                    built.tx_bytes,
                    [signature],
                    { "showEffects": true, "showEvents": true },
                    "WaitForLocalExecution",
                ]),
            )
            .await?;

        let effects = parse_execution(response)?;
        info!("{} confirmed: {}", call.target(), effects.digest);
        Ok(effects)
    }
}

fn move_call_params(key: &WalletKey, package_id: &str, call: &MoveCall) -> serde_json::Value {
    let arguments: Vec<serde_json::Value> = call.arguments.iter().map(|a| a.to_json()).collect();
    serde_json::json!([
        key.identity().as_str(),
        package_id,
        call.module,
        call.function,
        [],
        arguments,
        null,
        call.gas_budget.to_string(),
    ])
}

/// Turn an execute response into effects; anything but `success` is an error
pub fn parse_execution(value: serde_json::Value) -> Result<ExecutionEffects> {
    let response: ExecuteResponse = serde_json::from_value(value)
        .map_err(|e| Error::UnexpectedEffects(format!("malformed response: {}", e)))?;

    let effects = response
        .effects
        .ok_or_else(|| Error::UnexpectedEffects(format!("no effects for {}", response.digest)))?;

    if effects.status.status != "success" {
        return Err(Error::TransactionFailed(format!(
            "{}: {}",
            response.digest,
            effects.status.error.unwrap_or(effects.status.status)
        )));
    }

    Ok(ExecutionEffects {
        digest: response.digest,
        created: effects
            .created
            .into_iter()
            .map(|obj| CreatedObject {
                object_id: obj.reference.object_id,
                owner: obj.owner,
            })
            .collect(),
    })
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl<T> RpcResponse<T> {
    fn into_result(self, method: &str) -> Result<T> {
        if let Some(error) = self.error {
            return Err(Error::Rpc(format!(
                "{} failed ({}): {}",
                method, error.code, error.message
            )));
        }
        self.result
            .ok_or_else(|| Error::Rpc(format!("no result in {} response", method)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionBytes {
    tx_bytes: String,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    digest: String,
    effects: Option<EffectsBody>,
}

#[derive(Debug, Deserialize)]
struct EffectsBody {
    status: EffectsStatus,
    #[serde(default)]
    created: Vec<OwnedObjectRef>,
}

#[derive(Debug, Deserialize)]
struct EffectsStatus {
    status: String,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwnedObjectRef {
    owner: ObjectOwner,
    reference: ObjectRef,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectRef {
    object_id: String,
}
