//! In-memory wallet for tests. Built with `cfg(test)` or the `test-util`
//! feature.
//!
//! Behaves like an injected browser wallet talking to a chain that mines
//! every transaction instantly. It understands just enough of the ERC-20 and
//! ERC-1155 approval calls to answer `allowance` / `isApprovedForAll` from
//! what was actually mined; every other view call is answered from values
//! registered with [`MemoryWallet::set_call_result`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use alloy_primitives::{keccak256, Address, Bytes, B256, U256, U64};
use alloy_sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use tokio::sync::{broadcast, Notify};

use super::{RpcError, TransactionReceipt, TransactionRequest, WalletEvent, WalletProvider};
use crate::config::ChainDescriptor;
use crate::contracts::{IERC1155, IERC20};
use crate::error::{EnaError, Result};

#[derive(Debug, Default)]
struct MemoryState {
    accounts: Vec<Address>,
    authorized: bool,
    chain_id: u64,
    known_chains: HashSet<u64>,
    reject_next_request: bool,
    send_error: Option<RpcError>,
    switch_error: Option<RpcError>,
    revert_next: bool,
    mining: bool,
    send_gate: Option<Arc<Notify>>,
    block_number: u64,
    nonce: u64,
    sent: Vec<TransactionRequest>,
    methods: Vec<String>,
    receipts: HashMap<B256, TransactionReceipt>,
    allowances: HashMap<(Address, Address, Address), U256>,
    operators: HashMap<(Address, Address, Address), bool>,
    call_results: HashMap<(Address, [u8; 4]), Bytes>,
}

/// Scriptable in-memory [`WalletProvider`].
#[derive(Debug)]
pub struct MemoryWallet {
    state: Mutex<MemoryState>,
    event_tx: broadcast::Sender<WalletEvent>,
}

impl MemoryWallet {
    /// A wallet holding `accounts`, currently on `chain_id`, not yet authorized.
    pub fn new(accounts: Vec<Address>, chain_id: u64) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        let state = MemoryState {
            accounts,
            chain_id,
            known_chains: HashSet::from([1, chain_id]),
            mining: true,
            block_number: 1,
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
            event_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A poisoned lock only means another test thread panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Treat the accounts as already authorized (as after an earlier visit).
    pub fn authorize(&self) {
        self.lock().authorized = true;
    }

    /// Register a chain so switching to it succeeds without adding it.
    pub fn add_known_chain(&self, chain_id: u64) {
        self.lock().known_chains.insert(chain_id);
    }

    pub fn knows_chain(&self, chain_id: u64) -> bool {
        self.lock().known_chains.contains(&chain_id)
    }

    /// The user dismisses the next prompt (connect, switch, add or sign).
    pub fn reject_next_request(&self) {
        self.lock().reject_next_request = true;
    }

    /// Fail the next `eth_sendTransaction` with `error`.
    pub fn fail_next_send(&self, error: RpcError) {
        self.lock().send_error = Some(error);
    }

    /// Fail the next `wallet_switchEthereumChain` with `error`.
    pub fn fail_next_switch(&self, error: RpcError) {
        self.lock().switch_error = Some(error);
    }

    /// Mine the next transaction with a failed status.
    pub fn revert_next(&self) {
        self.lock().revert_next = true;
    }

    /// Stop (or resume) producing receipts.
    pub fn set_mining(&self, mining: bool) {
        self.lock().mining = mining;
    }

    /// Keep every later `eth_sendTransaction` waiting for the signature
    /// until the returned gate is notified, once per transaction.
    pub fn hold_sends(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.lock().send_gate = Some(Arc::clone(&gate));
        gate
    }

    /// Answer view calls to `to` with `selector` with `value`.
    pub fn set_call_result<T: SolValue>(&self, to: Address, selector: [u8; 4], value: T) {
        self.lock()
            .call_results
            .insert((to, selector), value.abi_encode().into());
    }

    /// The user switches network from the wallet UI.
    pub fn set_chain(&self, chain_id: u64) {
        {
            let mut state = self.lock();
            state.chain_id = chain_id;
            state.known_chains.insert(chain_id);
        }
        let _ = self.event_tx.send(WalletEvent::ChainChanged(chain_id));
    }

    /// The user changes the exposed accounts from the wallet UI.
    pub fn set_accounts(&self, accounts: Vec<Address>) {
        self.lock().accounts = accounts.clone();
        let _ = self.event_tx.send(WalletEvent::AccountsChanged(accounts));
    }

    /// Push a raw notification.
    pub fn emit(&self, event: WalletEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn current_chain(&self) -> u64 {
        self.lock().chain_id
    }

    /// Transactions signed so far, oldest first.
    pub fn sent_transactions(&self) -> Vec<TransactionRequest> {
        self.lock().sent.clone()
    }

    /// Wallet methods invoked so far, oldest first.
    pub fn methods(&self) -> Vec<String> {
        self.lock().methods.clone()
    }

    fn record(&self, method: &str) -> Result<MutexGuard<'_, MemoryState>> {
        let mut state = self.lock();
        state.methods.push(method.to_string());
        if std::mem::take(&mut state.reject_next_request) {
            return Err(EnaError::Rpc(RpcError::new(
                RpcError::USER_REJECTED,
                "User rejected the request.",
            )));
        }
        Ok(state)
    }

    fn require_authorized(state: &MemoryState) -> Result<Address> {
        if !state.authorized {
            return Err(EnaError::Rpc(RpcError::new(
                RpcError::UNAUTHORIZED,
                "The requested account has not been authorized by the user.",
            )));
        }
        state.accounts.first().copied().ok_or_else(|| {
            EnaError::Rpc(RpcError::new(RpcError::UNAUTHORIZED, "no accounts"))
        })
    }

    fn apply_effects(state: &mut MemoryState, tx: &TransactionRequest) {
        if let Ok(call) = IERC20::approveCall::abi_decode(&tx.data, true) {
            state
                .allowances
                .insert((tx.to, tx.from, call.spender), call.amount);
        } else if let Ok(call) = IERC1155::setApprovalForAllCall::abi_decode(&tx.data, true) {
            state
                .operators
                .insert((tx.to, tx.from, call.operator), call.approved);
        }
    }
}

#[async_trait]
impl WalletProvider for MemoryWallet {
    async fn request_accounts(&self) -> Result<Vec<Address>> {
        let mut state = self.record("eth_requestAccounts")?;
        state.authorized = true;
        Ok(state.accounts.clone())
    }

    async fn accounts(&self) -> Result<Vec<Address>> {
        let state = self.record("eth_accounts")?;
        Ok(if state.authorized {
            state.accounts.clone()
        } else {
            Vec::new()
        })
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.record("eth_chainId")?.chain_id)
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<()> {
        {
            let mut state = self.record("wallet_switchEthereumChain")?;
            if let Some(err) = state.switch_error.take() {
                return Err(EnaError::Rpc(err));
            }
            if !state.known_chains.contains(&chain_id) {
                return Err(EnaError::Rpc(RpcError::new(
                    RpcError::UNRECOGNIZED_CHAIN,
                    format!("Unrecognized chain ID {chain_id}."),
                )));
            }
            if state.chain_id == chain_id {
                return Ok(());
            }
            state.chain_id = chain_id;
        }
        let _ = self.event_tx.send(WalletEvent::ChainChanged(chain_id));
        Ok(())
    }

    async fn add_chain(&self, descriptor: &ChainDescriptor) -> Result<()> {
        let mut state = self.record("wallet_addEthereumChain")?;
        let chain_id = crate::units::parse_quantity(&descriptor.chain_id)?;
        state.known_chains.insert(chain_id);
        Ok(())
    }

    async fn send_transaction(&self, tx: &TransactionRequest) -> Result<B256> {
        let gate = self.record("eth_sendTransaction")?.send_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.lock();
        let from = Self::require_authorized(&state)?;
        if tx.from != from {
            return Err(EnaError::Rpc(RpcError::new(
                RpcError::UNAUTHORIZED,
                format!("{} is not the selected account", tx.from),
            )));
        }
        if let Some(err) = state.send_error.take() {
            return Err(EnaError::Rpc(err));
        }

        state.nonce += 1;
        let hash = keccak256((tx.from, state.nonce).abi_encode());
        state.sent.push(tx.clone());

        if state.mining {
            let reverted = std::mem::take(&mut state.revert_next);
            if !reverted {
                Self::apply_effects(&mut state, tx);
            }
            state.block_number += 1;
            let receipt = TransactionReceipt {
                transaction_hash: hash,
                block_number: Some(U64::from(state.block_number)),
                gas_used: Some(U64::from(50_000)),
                status: Some(U64::from(if reverted { 0 } else { 1 })),
            };
            state.receipts.insert(hash, receipt);
        }
        Ok(hash)
    }

    async fn call(&self, tx: &TransactionRequest) -> Result<Bytes> {
        let state = self.record("eth_call")?;

        if let Ok(call) = IERC20::allowanceCall::abi_decode(&tx.data, true) {
            let amount = state
                .allowances
                .get(&(tx.to, call.owner, call.spender))
                .copied()
                .unwrap_or_default();
            return Ok(amount.abi_encode().into());
        }
        if let Ok(call) = IERC1155::isApprovedForAllCall::abi_decode(&tx.data, true) {
            let approved = state
                .operators
                .get(&(tx.to, call.account, call.operator))
                .copied()
                .unwrap_or(false);
            return Ok(approved.abi_encode().into());
        }

        let selector = tx.selector().unwrap_or_default();
        state
            .call_results
            .get(&(tx.to, selector))
            .cloned()
            .ok_or_else(|| {
                EnaError::Rpc(RpcError::new(
                    RpcError::EXECUTION_REVERTED,
                    "execution reverted",
                ))
            })
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>> {
        Ok(self
            .record("eth_getTransactionReceipt")?
            .receipts
            .get(&hash)
            .cloned())
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.event_tx.subscribe()
    }
}
