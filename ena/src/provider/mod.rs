//! Wallet provider seam.
//!
//! Everything the client needs from a wallet is behind [`WalletProvider`]:
//! account access, network switching/registration, transaction signing and
//! broadcast, read-only calls, receipts, and account/chain notifications.
//! The request vocabulary and error codes follow EIP-1193.

pub mod http;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod subscriber;

use std::fmt;

use alloy_primitives::{hex, Address, Bytes, B256, U256, U64};
use alloy_sol_types::{Revert, SolError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::ChainDescriptor;
use crate::error::Result;

pub use http::HttpWalletProvider;
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryWallet;
pub use subscriber::WalletSubscription;

/// A wallet capable of authorizing accounts and signing transactions.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Ask the user to expose accounts (`eth_requestAccounts`).
    async fn request_accounts(&self) -> Result<Vec<Address>>;

    /// Accounts already exposed, without prompting (`eth_accounts`).
    async fn accounts(&self) -> Result<Vec<Address>>;

    /// Chain the wallet is currently on (`eth_chainId`).
    async fn chain_id(&self) -> Result<u64>;

    /// `wallet_switchEthereumChain`.
    async fn switch_chain(&self, chain_id: u64) -> Result<()>;

    /// `wallet_addEthereumChain`.
    async fn add_chain(&self, descriptor: &ChainDescriptor) -> Result<()>;

    /// Sign and broadcast (`eth_sendTransaction`), returning the hash.
    async fn send_transaction(&self, tx: &TransactionRequest) -> Result<B256>;

    /// Read-only contract call against the latest block (`eth_call`).
    async fn call(&self, tx: &TransactionRequest) -> Result<Bytes>;

    /// `eth_getTransactionReceipt`; `None` while the transaction is pending.
    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>>;

    /// Subscribe to account and chain notifications.
    fn subscribe(&self) -> broadcast::Receiver<WalletEvent>;
}

/// Notification pushed by the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
    /// The wallet can reach a chain again (EIP-1193 `connect`).
    Connected(u64),
    /// The wallet lost its connection to every chain (EIP-1193
    /// `disconnect`). Account authorization is unaffected.
    Disconnected,
}

/// JSON-RPC error object returned by a wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    /// Contract execution reverted.
    pub const EXECUTION_REVERTED: i64 = 3;
    /// The user rejected the request.
    pub const USER_REJECTED: i64 = 4001;
    /// The requested account or method has not been authorized.
    pub const UNAUTHORIZED: i64 = 4100;
    /// The wallet does not support the method.
    pub const UNSUPPORTED_METHOD: i64 = 4200;
    /// The wallet is disconnected from all chains.
    pub const DISCONNECTED: i64 = 4900;
    /// The wallet does not know the requested chain.
    pub const UNRECOGNIZED_CHAIN: i64 = 4902;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_user_rejection(&self) -> bool {
        self.code == Self::USER_REJECTED
    }

    pub fn is_unrecognized_chain(&self) -> bool {
        self.code == Self::UNRECOGNIZED_CHAIN
    }

    /// Decode an `Error(string)` revert payload carried in `data`.
    ///
    /// Wallets put the payload either directly in `data` or in `data.data`.
    pub fn revert_reason(&self) -> Option<String> {
        let raw = match self.data.as_ref()? {
            serde_json::Value::String(s) => s.as_str(),
            serde_json::Value::Object(obj) => obj.get("data")?.as_str()?,
            _ => return None,
        };
        let bytes = hex::decode(raw).ok()?;
        Revert::abi_decode(&bytes, true).ok().map(|r| r.reason)
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for RpcError {}

/// Transaction or call parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
}

impl TransactionRequest {
    pub fn new(from: Address, to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            from,
            to,
            data: data.into(),
            value: None,
        }
    }

    /// First four bytes of the call data.
    pub fn selector(&self) -> Option<[u8; 4]> {
        self.data.get(..4).and_then(|s| s.try_into().ok())
    }
}

/// Subset of a transaction receipt the tracker needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub gas_used: Option<U64>,
    /// `1` success, `0` revert. Absent on pre-Byzantium chains.
    #[serde(default)]
    pub status: Option<U64>,
}

impl TransactionReceipt {
    pub fn succeeded(&self) -> bool {
        self.status.map_or(true, |s| s == U64::from(1))
    }

    pub fn block_number(&self) -> Option<u64> {
        self.block_number.map(|n| n.to::<u64>())
    }

    pub fn gas_used(&self) -> Option<u64> {
        self.gas_used.map(|n| n.to::<u64>())
    }
}
