//! Ledger capability
//!
//! Workflows talk to the chain through the [`Ledger`] trait: build a Move
//! call, sign it with the wallet key and wait for local execution. The
//! JSON-RPC implementation lives in [`rpc`].

pub mod rpc;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::Result;
use crate::wallet::{WalletIdentity, WalletKey};

pub use rpc::SuiRpcLedger;

/// Argument of a Move call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallArg {
    /// UTF-8 string argument
    Str(String),
    U64(u64),
    /// Object reference by id
    Object(String),
    Address(String),
}

impl CallArg {
    /// JSON form accepted by the fullnode's Move call builder
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CallArg::Str(s) | CallArg::Object(s) | CallArg::Address(s) => {
                serde_json::Value::String(s.clone())
            }
            // u64 travels as a decimal string
            CallArg::U64(n) => serde_json::Value::String(n.to_string()),
        }
    }
}

/// One Move call with an explicit gas budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveCall {
    pub module: &'static str,
    pub function: &'static str,
    pub arguments: Vec<CallArg>,
    pub gas_budget: u64,
}

impl MoveCall {
    pub fn new(module: &'static str, function: &'static str, gas_budget: u64) -> Self {
        Self {
            module,
            function,
            arguments: Vec::new(),
            gas_budget,
        }
    }

    pub fn arg(mut self, arg: CallArg) -> Self {
        self.arguments.push(arg);
        self
    }

    pub fn target(&self) -> String {
        format!("{}::{}", self.module, self.function)
    }
}

/// Owner of an object created by a transaction
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum ObjectOwner {
    AddressOwner(String),
    ObjectOwner(String),
    Shared {
        #[serde(default)]
        initial_shared_version: Option<u64>,
    },
    Immutable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedObject {
    pub object_id: String,
    pub owner: ObjectOwner,
}

/// What a successful transaction left behind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionEffects {
    pub digest: String,
    pub created: Vec<CreatedObject>,
}

impl ExecutionEffects {
    /// First created object owned by `address`
    pub fn owned_by(&self, address: &WalletIdentity) -> Option<&str> {
        self.created.iter().find_map(|obj| match &obj.owner {
            ObjectOwner::AddressOwner(owner) if owner == address.as_str() => {
                Some(obj.object_id.as_str())
            }
            _ => None,
        })
    }

    /// First created shared object
    pub fn shared(&self) -> Option<&str> {
        self.created.iter().find_map(|obj| match obj.owner {
            ObjectOwner::Shared { .. } => Some(obj.object_id.as_str()),
            _ => None,
        })
    }
}

/// Signs and executes Move calls on behalf of a wallet
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Execute `call` signed by `key`, waiting for local execution.
    /// A transaction whose effects are not `success` is an error.
    async fn execute(&self, key: &WalletKey, call: &MoveCall) -> Result<ExecutionEffects>;
}

/// Connectivity check run before any wallet is touched
#[async_trait]
pub trait ChainProbe: Send + Sync {
    fn endpoint(&self) -> &str;

    /// Chain identifier reported by the node, bounded by `timeout`
    async fn chain_identifier(&self, timeout: Duration) -> Result<String>;
}
