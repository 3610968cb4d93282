//! Wallet connection and network state.
//!
//! [`ConnectionManager`] is the single owner of the session: it is created
//! once, shared by `Arc`, and is the only thing that mutates connection
//! state. Consumers read the current [`ConnectionState`] or observe it
//! through a `watch` channel.

use std::fmt;
use std::sync::Arc;

use alloy_primitives::Address;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ChainChangePolicy, DappConfig, NetworkRequirement};
use crate::error::{EnaError, Result};
use crate::provider::{WalletEvent, WalletProvider, WalletSubscription};

/// Connection state machine.
///
/// `Disconnected → Connecting → WrongNetwork ⇄ Ready`, and back to
/// `Disconnected` from either connected state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    WrongNetwork { account: Address, chain_id: u64 },
    Ready { account: Address, chain_id: u64 },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::WrongNetwork { .. } | Self::Ready { .. })
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    pub fn account(&self) -> Option<Address> {
        match self {
            Self::WrongNetwork { account, .. } | Self::Ready { account, .. } => Some(*account),
            _ => None,
        }
    }

    pub fn chain_id(&self) -> Option<u64> {
        match self {
            Self::WrongNetwork { chain_id, .. } | Self::Ready { chain_id, .. } => Some(*chain_id),
            _ => None,
        }
    }

    pub fn session(&self) -> Session {
        Session {
            account: self.account(),
            chain_id: self.chain_id(),
            connected: self.is_connected(),
        }
    }

    fn connected(account: Address, chain_id: u64, required: u64) -> Self {
        if chain_id == required {
            Self::Ready { account, chain_id }
        } else {
            Self::WrongNetwork { account, chain_id }
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::WrongNetwork { chain_id, .. } => write!(f, "connected (wrong network {chain_id})"),
            Self::Ready { chain_id, .. } => write!(f, "connected (chain {chain_id})"),
        }
    }
}

/// Snapshot of the wallet connection. `connected` implies `account` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Session {
    pub account: Option<Address>,
    pub chain_id: Option<u64>,
    pub connected: bool,
}

/// Tracks the wallet connection and the active network.
pub struct ConnectionManager {
    provider: Option<Arc<dyn WalletProvider>>,
    network: NetworkRequirement,
    policy: ChainChangePolicy,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    /// `provider` is `None` when no wallet is installed.
    pub fn new(provider: Option<Arc<dyn WalletProvider>>, config: &DappConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            provider,
            network: config.network.clone(),
            policy: config.chain_change_policy,
            state_tx,
        }
    }

    /// The wallet, or `WalletUnavailable` when none is installed.
    pub fn provider(&self) -> Result<&Arc<dyn WalletProvider>> {
        self.provider
            .as_ref()
            .ok_or_else(|| EnaError::WalletUnavailable("no wallet provider found".into()))
    }

    pub fn network(&self) -> &NetworkRequirement {
        &self.network
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn session(&self) -> Session {
        self.state().session()
    }

    /// Observe state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Ask the wallet for account access.
    ///
    /// On failure the previous state is kept. Connecting while already
    /// connected returns the current session without prompting.
    pub async fn connect(&self) -> Result<Session> {
        let provider = self.provider()?.clone();
        let previous = self.state();
        if previous.is_connected() {
            return Ok(previous.session());
        }

        self.transition(ConnectionState::Connecting);
        let result = async {
            let accounts = provider.request_accounts().await?;
            let account = accounts
                .first()
                .copied()
                .ok_or_else(|| EnaError::WalletUnavailable("wallet exposed no accounts".into()))?;
            let chain_id = provider.chain_id().await?;
            Ok::<_, EnaError>((account, chain_id))
        }
        .await;

        match result {
            Ok((account, chain_id)) => {
                let state = ConnectionState::connected(account, chain_id, self.network.chain_id);
                self.transition(state);
                info!(%account, chain_id, ready = state.is_ready(), "wallet connected");
                Ok(state.session())
            }
            Err(e) => {
                self.transition(previous);
                let err = connect_error(e);
                warn!(error = %err, "wallet connection failed");
                Err(err)
            }
        }
    }

    /// Restore a session the wallet already authorized, without prompting.
    pub async fn auto_reconnect(&self) -> Option<Session> {
        let provider = self.provider.as_ref()?.clone();
        if self.state().is_connected() {
            return Some(self.session());
        }

        let account = match provider.accounts().await {
            Ok(accounts) => accounts.first().copied()?,
            Err(e) => {
                debug!(error = %e, "auto-reconnect skipped");
                return None;
            }
        };
        let chain_id = match provider.chain_id().await {
            Ok(id) => id,
            Err(e) => {
                debug!(error = %e, "auto-reconnect skipped");
                return None;
            }
        };

        let state = ConnectionState::connected(account, chain_id, self.network.chain_id);
        self.transition(state);
        info!(%account, chain_id, "wallet session restored");
        Some(state.session())
    }

    /// Forget the session. Idempotent.
    pub fn disconnect(&self) {
        let previous = self.state_tx.send_replace(ConnectionState::Disconnected);
        if previous != ConnectionState::Disconnected {
            info!("wallet disconnected");
        }
    }

    /// Make sure the wallet is on the required network.
    ///
    /// Sends `wallet_switchEthereumChain`; when the wallet does not know the
    /// chain, registers it with `wallet_addEthereumChain` and switches again.
    /// Never retries on its own.
    pub async fn ensure_network(&self) -> Result<()> {
        let provider = self.provider()?.clone();
        let current = match self.state() {
            ConnectionState::Ready { .. } => return Ok(()),
            ConnectionState::WrongNetwork { chain_id, .. } => chain_id,
            _ => return Err(EnaError::NotReady("wallet not connected".into())),
        };

        let required = self.network.chain_id;
        info!(from = current, to = required, network = %self.network.name, "switching network");

        match provider.switch_chain(required).await {
            Ok(()) => {}
            Err(EnaError::Rpc(e)) if e.is_unrecognized_chain() => {
                info!(chain_id = required, "network unknown to wallet, registering it");
                provider
                    .add_chain(&self.network.descriptor())
                    .await
                    .map_err(switch_error)?;
                provider.switch_chain(required).await.map_err(switch_error)?;
            }
            Err(e) => return Err(switch_error(e)),
        }

        let chain_id = provider.chain_id().await.map_err(switch_error)?;
        self.apply_chain(chain_id);
        if chain_id != required {
            return Err(EnaError::NetworkSwitchFailed(format!(
                "wallet still reports chain {chain_id}"
            )));
        }
        Ok(())
    }

    /// Account and chain id when connected to the required network.
    pub fn ready_session(&self) -> Result<(Address, u64)> {
        match self.state() {
            ConnectionState::Ready { account, chain_id } => Ok((account, chain_id)),
            ConnectionState::WrongNetwork { chain_id, .. } => Err(EnaError::NotReady(format!(
                "wallet is on chain {chain_id}, switch to {} ({})",
                self.network.name, self.network.chain_id
            ))),
            ConnectionState::Connecting => Err(EnaError::NotReady("wallet connection pending".into())),
            ConnectionState::Disconnected => Err(EnaError::NotReady("wallet not connected".into())),
        }
    }

    /// Record a chain id observed outside the notification stream.
    pub fn observe_chain(&self, chain_id: u64) {
        self.apply_chain(chain_id);
    }

    /// Apply one wallet notification.
    ///
    /// Only an empty account list ends the session. A wallet that loses its
    /// connection keeps the session, and the chain it reports on
    /// reconnecting is applied like any other chain change.
    pub async fn handle_event(&self, event: WalletEvent) {
        match event {
            WalletEvent::AccountsChanged(accounts) => self.apply_accounts(&accounts),
            WalletEvent::ChainChanged(chain_id) => self.chain_changed(chain_id).await,
            WalletEvent::Connected(chain_id) => {
                info!(chain_id, "wallet reachable again");
                self.chain_changed(chain_id).await;
            }
            WalletEvent::Disconnected => {
                if self.state().is_connected() {
                    warn!("wallet unreachable; session kept until it reconnects");
                }
            }
        }
    }

    async fn chain_changed(&self, chain_id: u64) {
        self.apply_chain(chain_id);
        if chain_id == self.network.chain_id || !self.state().is_connected() {
            return;
        }
        match self.policy {
            ChainChangePolicy::Revalidate => {
                info!(chain_id, "wallet left the required network; actions paused");
            }
            ChainChangePolicy::AutoSwitch => {
                if let Err(e) = self.ensure_network().await {
                    warn!(error = %e, "automatic network switch failed");
                }
            }
            ChainChangePolicy::Reset => {
                warn!(chain_id, "wallet left the required network; resetting session");
                self.disconnect();
            }
        }
    }

    /// Consume wallet notifications in the background until the returned
    /// handle is stopped or dropped.
    pub fn listen(self: &Arc<Self>) -> Result<ListenerHandle> {
        let mut subscription = WalletSubscription::new(self.provider()?.subscribe());
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let manager = Arc::clone(self);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = subscription.next() => match event {
                        Some(event) => {
                            debug!(?event, "wallet event");
                            manager.handle_event(event).await;
                        }
                        None => {
                            debug!("wallet event stream closed");
                            break;
                        }
                    },
                }
            }
        });

        Ok(ListenerHandle { cancel, task })
    }

    fn transition(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "connection state changed");
        }
    }

    fn apply_chain(&self, chain_id: u64) {
        let required = self.network.chain_id;
        let changed = self.state_tx.send_if_modified(|state| match state.account() {
            Some(account) if state.chain_id() != Some(chain_id) => {
                *state = ConnectionState::connected(account, chain_id, required);
                true
            }
            _ => false,
        });
        if changed {
            info!(chain_id, ready = chain_id == required, "wallet network changed");
        }
    }

    fn apply_accounts(&self, accounts: &[Address]) {
        let Some(&first) = accounts.first() else {
            self.disconnect();
            return;
        };
        let required = self.network.chain_id;
        let changed = self.state_tx.send_if_modified(|state| match (state.account(), state.chain_id()) {
            (Some(account), Some(chain_id)) if account != first => {
                *state = ConnectionState::connected(first, chain_id, required);
                true
            }
            _ => false,
        });
        if changed {
            info!(account = %first, "wallet account changed");
        }
    }
}

/// Stops the notification listener when stopped or dropped.
pub struct ListenerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn connect_error(err: EnaError) -> EnaError {
    match err {
        EnaError::Rpc(e) if e.is_user_rejection() => EnaError::UserRejected(e.message),
        e if e.is_transport() => EnaError::WalletUnavailable(e.to_string()),
        e => e,
    }
}

fn switch_error(err: EnaError) -> EnaError {
    match err {
        EnaError::Rpc(e) => EnaError::NetworkSwitchFailed(e.to_string()),
        EnaError::NetworkSwitchFailed(msg) => EnaError::NetworkSwitchFailed(msg),
        e => EnaError::NetworkSwitchFailed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SONEIUM_CHAIN_ID;
    use crate::provider::{MemoryWallet, RpcError};
    use alloy_primitives::address;
    use std::time::Duration;

    const USER: Address = address!("00000000000000000000000000000000000000aa");
    const OTHER: Address = address!("00000000000000000000000000000000000000bb");

    fn manager_with(wallet: &Arc<MemoryWallet>, policy: ChainChangePolicy) -> Arc<ConnectionManager> {
        let config = DappConfig {
            chain_change_policy: policy,
            ..Default::default()
        };
        let provider: Arc<dyn WalletProvider> = wallet.clone();
        Arc::new(ConnectionManager::new(Some(provider), &config))
    }

    fn manager(wallet: &Arc<MemoryWallet>) -> Arc<ConnectionManager> {
        manager_with(wallet, ChainChangePolicy::Revalidate)
    }

    #[tokio::test]
    async fn test_connect_without_wallet() {
        let manager = ConnectionManager::new(None, &DappConfig::default());
        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, EnaError::WalletUnavailable(_)));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.session(), Session::default());
    }

    #[tokio::test]
    async fn test_connect_on_required_network() {
        let wallet = Arc::new(MemoryWallet::new(vec![USER], SONEIUM_CHAIN_ID));
        let manager = manager(&wallet);

        let session = manager.connect().await.unwrap();
        assert!(session.connected);
        assert_eq!(session.account, Some(USER));
        assert_eq!(session.chain_id, Some(SONEIUM_CHAIN_ID));
        assert_eq!(manager.ready_session().unwrap(), (USER, SONEIUM_CHAIN_ID));
    }

    #[tokio::test]
    async fn test_connect_on_wrong_network() {
        let wallet = Arc::new(MemoryWallet::new(vec![USER], 1));
        let manager = manager(&wallet);

        manager.connect().await.unwrap();
        assert_eq!(
            manager.state(),
            ConnectionState::WrongNetwork {
                account: USER,
                chain_id: 1
            }
        );
        assert!(matches!(manager.ready_session(), Err(EnaError::NotReady(_))));
    }

    #[tokio::test]
    async fn test_connect_rejected_keeps_state() {
        let wallet = Arc::new(MemoryWallet::new(vec![USER], SONEIUM_CHAIN_ID));
        wallet.reject_next_request();
        let manager = manager(&wallet);

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, EnaError::UserRejected(_)));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_twice_does_not_prompt() {
        let wallet = Arc::new(MemoryWallet::new(vec![USER], SONEIUM_CHAIN_ID));
        let manager = manager(&wallet);

        manager.connect().await.unwrap();
        manager.connect().await.unwrap();
        let prompts = wallet
            .methods()
            .iter()
            .filter(|m| *m == "eth_requestAccounts")
            .count();
        assert_eq!(prompts, 1);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let wallet = Arc::new(MemoryWallet::new(vec![USER], SONEIUM_CHAIN_ID));
        let manager = manager(&wallet);
        manager.connect().await.unwrap();

        manager.disconnect();
        manager.disconnect();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.session().connected);
    }

    #[tokio::test]
    async fn test_auto_reconnect() {
        let wallet = Arc::new(MemoryWallet::new(vec![USER], SONEIUM_CHAIN_ID));
        let manager = manager(&wallet);
        assert_eq!(manager.auto_reconnect().await, None);

        wallet.authorize();
        let session = manager.auto_reconnect().await.unwrap();
        assert_eq!(session.account, Some(USER));
        assert!(manager.state().is_ready());
        assert!(!wallet.methods().contains(&"eth_requestAccounts".to_string()));
    }

    #[tokio::test]
    async fn test_ensure_network_adds_then_switches() {
        let wallet = Arc::new(MemoryWallet::new(vec![USER], 1));
        let manager = manager(&wallet);
        manager.connect().await.unwrap();
        assert!(!wallet.knows_chain(SONEIUM_CHAIN_ID));

        manager.ensure_network().await.unwrap();

        let methods = wallet.methods();
        let network_calls: Vec<_> = methods
            .iter()
            .filter(|m| m.starts_with("wallet_"))
            .map(String::as_str)
            .collect();
        assert_eq!(
            network_calls,
            vec![
                "wallet_switchEthereumChain",
                "wallet_addEthereumChain",
                "wallet_switchEthereumChain"
            ]
        );
        assert_eq!(manager.session().chain_id, Some(SONEIUM_CHAIN_ID));
        assert!(manager.state().is_ready());
    }

    #[tokio::test]
    async fn test_ensure_network_known_chain_switches_directly() {
        let wallet = Arc::new(MemoryWallet::new(vec![USER], 1));
        wallet.add_known_chain(SONEIUM_CHAIN_ID);
        let manager = manager(&wallet);
        manager.connect().await.unwrap();

        manager.ensure_network().await.unwrap();
        assert!(!wallet.methods().contains(&"wallet_addEthereumChain".to_string()));
        assert!(manager.state().is_ready());
    }

    #[tokio::test]
    async fn test_ensure_network_rejected() {
        let wallet = Arc::new(MemoryWallet::new(vec![USER], 1));
        wallet.add_known_chain(SONEIUM_CHAIN_ID);
        let manager = manager(&wallet);
        manager.connect().await.unwrap();

        wallet.reject_next_request();
        let err = manager.ensure_network().await.unwrap_err();
        assert!(matches!(err, EnaError::NetworkSwitchFailed(_)));
        assert!(!manager.state().is_ready());

        // Exactly one attempt: no silent retry.
        let switches = wallet
            .methods()
            .iter()
            .filter(|m| *m == "wallet_switchEthereumChain")
            .count();
        assert_eq!(switches, 1);
    }

    #[tokio::test]
    async fn test_ensure_network_other_error() {
        let wallet = Arc::new(MemoryWallet::new(vec![USER], 1));
        wallet.fail_next_switch(RpcError::new(-32002, "Request already pending"));
        let manager = manager(&wallet);
        manager.connect().await.unwrap();

        let err = manager.ensure_network().await.unwrap_err();
        match err {
            EnaError::NetworkSwitchFailed(reason) => assert!(reason.contains("already pending")),
            other => panic!("expected NetworkSwitchFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ensure_network_requires_connection() {
        let wallet = Arc::new(MemoryWallet::new(vec![USER], 1));
        let manager = manager(&wallet);
        let err = manager.ensure_network().await.unwrap_err();
        assert!(matches!(err, EnaError::NotReady(_)));
    }

    #[tokio::test]
    async fn test_chain_change_marks_wrong_network() {
        let wallet = Arc::new(MemoryWallet::new(vec![USER], SONEIUM_CHAIN_ID));
        let manager = manager(&wallet);
        manager.connect().await.unwrap();

        manager.handle_event(WalletEvent::ChainChanged(10)).await;
        assert_eq!(
            manager.state(),
            ConnectionState::WrongNetwork {
                account: USER,
                chain_id: 10
            }
        );

        manager.handle_event(WalletEvent::ChainChanged(SONEIUM_CHAIN_ID)).await;
        assert!(manager.state().is_ready());
    }

    #[tokio::test]
    async fn test_chain_change_reset_policy() {
        let wallet = Arc::new(MemoryWallet::new(vec![USER], SONEIUM_CHAIN_ID));
        let manager = manager_with(&wallet, ChainChangePolicy::Reset);
        manager.connect().await.unwrap();

        manager.handle_event(WalletEvent::ChainChanged(1)).await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_chain_change_auto_switch_policy() {
        let wallet = Arc::new(MemoryWallet::new(vec![USER], SONEIUM_CHAIN_ID));
        let manager = manager_with(&wallet, ChainChangePolicy::AutoSwitch);
        manager.connect().await.unwrap();

        wallet.set_chain(1);
        manager.handle_event(WalletEvent::ChainChanged(1)).await;
        assert!(manager.state().is_ready());
        assert_eq!(wallet.current_chain(), SONEIUM_CHAIN_ID);
    }

    #[tokio::test]
    async fn test_accounts_changed() {
        let wallet = Arc::new(MemoryWallet::new(vec![USER], SONEIUM_CHAIN_ID));
        let manager = manager(&wallet);
        manager.connect().await.unwrap();

        manager
            .handle_event(WalletEvent::AccountsChanged(vec![OTHER]))
            .await;
        assert_eq!(manager.session().account, Some(OTHER));

        manager.handle_event(WalletEvent::AccountsChanged(vec![])).await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_wallet_outage_keeps_session() {
        let wallet = Arc::new(MemoryWallet::new(vec![USER], SONEIUM_CHAIN_ID));
        let manager = manager(&wallet);
        manager.connect().await.unwrap();

        manager.handle_event(WalletEvent::Disconnected).await;
        assert_eq!(manager.ready_session().unwrap(), (USER, SONEIUM_CHAIN_ID));

        manager
            .handle_event(WalletEvent::Connected(SONEIUM_CHAIN_ID))
            .await;
        assert_eq!(
            manager.state(),
            ConnectionState::Ready {
                account: USER,
                chain_id: SONEIUM_CHAIN_ID
            }
        );
        assert_eq!(wallet.accounts().await.unwrap(), vec![USER]);
    }

    #[tokio::test]
    async fn test_reconnect_on_other_chain_applies_policy() {
        let wallet = Arc::new(MemoryWallet::new(vec![USER], SONEIUM_CHAIN_ID));
        let manager = manager_with(&wallet, ChainChangePolicy::Reset);
        manager.connect().await.unwrap();

        manager.handle_event(WalletEvent::Disconnected).await;
        assert!(manager.state().is_connected());

        manager.handle_event(WalletEvent::Connected(1)).await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_events_ignored_while_disconnected() {
        let wallet = Arc::new(MemoryWallet::new(vec![USER], SONEIUM_CHAIN_ID));
        let manager = manager(&wallet);

        manager.handle_event(WalletEvent::ChainChanged(1)).await;
        manager
            .handle_event(WalletEvent::AccountsChanged(vec![OTHER]))
            .await;
        manager.handle_event(WalletEvent::Connected(SONEIUM_CHAIN_ID)).await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_listener_follows_wallet() {
        let wallet = Arc::new(MemoryWallet::new(vec![USER], SONEIUM_CHAIN_ID));
        let manager = manager(&wallet);
        manager.connect().await.unwrap();

        let mut states = manager.subscribe_state();
        let listener = manager.listen().unwrap();

        wallet.set_chain(1);
        tokio::time::timeout(Duration::from_secs(1), states.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(!states.borrow().is_ready());

        listener.stop();
        tokio::time::timeout(Duration::from_secs(1), async {
            while !listener.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        // Unsubscribed: later notifications no longer reach the manager.
        wallet.set_chain(SONEIUM_CHAIN_ID);
        tokio::task::yield_now().await;
        assert!(!manager.state().is_ready());
    }
}
