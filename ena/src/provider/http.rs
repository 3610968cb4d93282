use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{RpcError, TransactionReceipt, TransactionRequest, WalletEvent, WalletProvider};
use crate::config::ChainDescriptor;
use crate::error::{EnaError, Result};
use crate::units::{parse_quantity, to_chain_id_hex};

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// JSON-RPC 2.0 transport over HTTP.
#[derive(Debug, Clone)]
struct RpcTransport {
    client: Client,
    url: String,
    next_id: Arc<AtomicU64>,
}

impl RpcTransport {
    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        debug!(method, id, "wallet request");
        let resp = self.client.post(&self.url).json(&body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(EnaError::Http { status, message });
        }

        let resp: RpcResponse = resp.json().await?;
        if let Some(err) = resp.error {
            debug!(method, code = err.code, "wallet returned error");
            return Err(EnaError::Rpc(err));
        }
        Ok(serde_json::from_value(resp.result.unwrap_or(Value::Null))?)
    }

    async fn accounts(&self) -> Result<Vec<Address>> {
        self.request("eth_accounts", json!([])).await
    }

    async fn chain_id(&self) -> Result<u64> {
        let hex: String = self.request("eth_chainId", json!([])).await?;
        parse_quantity(&hex)
    }
}

/// Wallet reached through EIP-1193 requests sent as JSON-RPC over HTTP.
///
/// HTTP has no push channel, so notifications are synthesized by polling
/// `eth_accounts` and `eth_chainId` once [`start_polling`](Self::start_polling)
/// is called.
#[derive(Debug)]
pub struct HttpWalletProvider {
    transport: RpcTransport,
    event_tx: broadcast::Sender<WalletEvent>,
    poller: Mutex<Option<CancellationToken>>,
}

impl HttpWalletProvider {
    pub fn new(url: &str) -> Result<Self> {
        let parsed = url::Url::parse(url)
            .map_err(|e| EnaError::Config(format!("invalid wallet URL {url:?}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(EnaError::Config(format!(
                "wallet URL must be http(s), got {url:?}"
            )));
        }

        let (event_tx, _) = broadcast::channel(64);
        Ok(Self {
            transport: RpcTransport {
                client: Client::new(),
                url: url.to_string(),
                next_id: Arc::new(AtomicU64::new(1)),
            },
            event_tx,
            poller: Mutex::new(None),
        })
    }

    pub fn url(&self) -> &str {
        &self.transport.url
    }

    /// Send an arbitrary request.
    pub async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        self.transport.request(method, params).await
    }

    /// Start polling the wallet for account and chain changes.
    ///
    /// Replaces any poller already running.
    pub fn start_polling(&self, interval: Duration) {
        let cancel = CancellationToken::new();
        if let Ok(mut slot) = self.poller.lock() {
            if let Some(old) = slot.replace(cancel.clone()) {
                old.cancel();
            }
        }

        let transport = self.transport.clone();
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut state = PollState::default();
            info!(url = %transport.url, ?interval, "wallet poller started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("wallet poller stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        let observed = match transport.accounts().await {
                            Ok(accounts) => transport
                                .chain_id()
                                .await
                                .map(|chain_id| (accounts, chain_id)),
                            Err(e) => Err(e),
                        };
                        let events = match observed {
                            Ok((accounts, chain_id)) => state.observe(accounts, chain_id),
                            Err(e) => {
                                if state.reachable {
                                    warn!(error = %e, "wallet unreachable");
                                }
                                state.unreachable()
                            }
                        };
                        for event in events {
                            let _ = event_tx.send(event);
                        }
                    }
                }
            }
        });
    }

    /// Stop the notification poller.
    pub fn close(&self) {
        if let Ok(mut slot) = self.poller.lock() {
            if let Some(cancel) = slot.take() {
                cancel.cancel();
            }
        }
    }
}

impl Drop for HttpWalletProvider {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl WalletProvider for HttpWalletProvider {
    async fn request_accounts(&self) -> Result<Vec<Address>> {
        self.transport.request("eth_requestAccounts", json!([])).await
    }

    async fn accounts(&self) -> Result<Vec<Address>> {
        self.transport.accounts().await
    }

    async fn chain_id(&self) -> Result<u64> {
        self.transport.chain_id().await
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<()> {
        let _: Value = self
            .transport
            .request(
                "wallet_switchEthereumChain",
                json!([{ "chainId": to_chain_id_hex(chain_id) }]),
            )
            .await?;
        Ok(())
    }

    async fn add_chain(&self, descriptor: &ChainDescriptor) -> Result<()> {
        let _: Value = self
            .transport
            .request("wallet_addEthereumChain", json!([descriptor]))
            .await?;
        Ok(())
    }

    async fn send_transaction(&self, tx: &TransactionRequest) -> Result<B256> {
        self.transport
            .request("eth_sendTransaction", json!([tx]))
            .await
    }

    async fn call(&self, tx: &TransactionRequest) -> Result<Bytes> {
        self.transport
            .request("eth_call", json!([tx, "latest"]))
            .await
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>> {
        self.transport
            .request("eth_getTransactionReceipt", json!([hash]))
            .await
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.event_tx.subscribe()
    }
}

/// Last observation of the poller, used to turn snapshots into change events.
#[derive(Debug, Default)]
struct PollState {
    accounts: Option<Vec<Address>>,
    chain_id: Option<u64>,
    reachable: bool,
    outage: bool,
}

impl PollState {
    /// Record a snapshot and return what changed since the previous one.
    ///
    /// The first snapshot after start-up is a baseline and emits nothing.
    /// The first one after an outage emits `Connected`, followed by whatever
    /// differs from what was seen before the outage.
    fn observe(&mut self, accounts: Vec<Address>, chain_id: u64) -> Vec<WalletEvent> {
        let mut events = Vec::new();
        if std::mem::take(&mut self.outage) {
            events.push(WalletEvent::Connected(chain_id));
        }
        if self.accounts.as_ref().is_some_and(|prev| *prev != accounts) {
            events.push(WalletEvent::AccountsChanged(accounts.clone()));
        }
        if self.chain_id.is_some_and(|prev| prev != chain_id) {
            events.push(WalletEvent::ChainChanged(chain_id));
        }
        self.accounts = Some(accounts);
        self.chain_id = Some(chain_id);
        self.reachable = true;
        events
    }

    /// Record a failed poll. Emits `Disconnected` once per outage.
    fn unreachable(&mut self) -> Vec<WalletEvent> {
        if !self.reachable {
            return Vec::new();
        }
        self.reachable = false;
        self.outage = true;
        vec![WalletEvent::Disconnected]
    }
}
