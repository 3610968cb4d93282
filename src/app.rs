use std::io;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use ena::{
    ApprovalAmount, ChainChangePolicy, ConnectionManager, ContractGateway, DappConfig,
    HttpWalletProvider, PendingTransaction, WalletProvider,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::{Command, GlobalArgs};
use crate::error::AppError;
use crate::output::{
    pending_hint, write_confirmation, write_session, write_state, write_status, write_submitted,
    StatusReport,
};

/// Wallet bridge address used when neither `--wallet-url` nor
/// `ENA_WALLET_URL` is set.
pub const DEFAULT_WALLET_URL: &str = "http://127.0.0.1:8545";

pub struct App {
    config: DappConfig,
    wallet: Arc<HttpWalletProvider>,
    connection: Arc<ConnectionManager>,
    json: bool,
    wait: bool,
}

impl App {
    pub fn new(args: &GlobalArgs, policy: ChainChangePolicy) -> Result<Self, AppError> {
        let env = |key: &str| std::env::var(key).ok();
        let wallet_url = args
            .wallet_url
            .clone()
            .or_else(|| env("ENA_WALLET_URL"))
            .unwrap_or_else(|| DEFAULT_WALLET_URL.to_string());
        let config = DappConfig {
            chain_change_policy: policy,
            ..build_config(args, env)?
        };

        let wallet = Arc::new(HttpWalletProvider::new(&wallet_url)?);
        let provider: Arc<dyn WalletProvider> = wallet.clone();
        let connection = Arc::new(ConnectionManager::new(Some(provider), &config));
        info!(wallet = %wallet_url, network = %config.network.name, "ena starting");

        Ok(Self {
            config,
            wallet,
            connection,
            json: args.json,
            wait: !args.no_wait,
        })
    }

    pub async fn run(&self, command: Command, cancel: CancellationToken) -> Result<(), AppError> {
        match command {
            Command::Status => self.status(true).await,
            Command::Balance => {
                self.require_session().await?;
                self.connection.ready_session()?;
                self.status(false).await
            }
            Command::Connect => {
                let session = self.connection.connect().await?;
                write_session(&session, self.json, &mut io::stdout())
            }
            Command::SwitchNetwork => {
                self.require_session().await?;
                self.connection.ensure_network().await?;
                write_session(&self.connection.session(), self.json, &mut io::stdout())
            }
            Command::Watch { .. } => self.watch(cancel).await,
            action => self.execute(action, &cancel).await,
        }
    }

    /// Restore the wallet session, prompting only if the wallet has not
    /// authorized this client before.
    async fn require_session(&self) -> Result<(), AppError> {
        if self.connection.auto_reconnect().await.is_none() {
            self.connection.connect().await?;
        }
        Ok(())
    }

    fn gateway(&self) -> Result<ContractGateway, AppError> {
        Ok(ContractGateway::from_config(
            Arc::clone(&self.connection),
            &self.config,
        )?)
    }

    async fn execute(&self, command: Command, cancel: &CancellationToken) -> Result<(), AppError> {
        self.require_session().await?;
        let gateway = self.gateway()?;

        let pending = match command {
            Command::StakeNft { token_id, amount } => gateway.stake_nft(&token_id, &amount).await?,
            Command::UnstakeNft { index } => gateway.unstake_nft(&index).await?,
            Command::ClaimAll => gateway.claim_all().await?,
            Command::Stake { amount } => gateway.stake_tokens(&amount).await?,
            Command::Withdraw { amount } => gateway.withdraw(&amount).await?,
            Command::Claim => gateway.claim().await?,
            Command::ApproveToken { amount, unlimited } => {
                let amount = match (amount, unlimited) {
                    (_, true) => ApprovalAmount::Unlimited,
                    (Some(amount), false) => ApprovalAmount::parse(&amount, gateway.token_decimals())?,
                    (None, false) => {
                        return Err(AppError::Config(
                            "approve-token needs --amount or --unlimited".into(),
                        ))
                    }
                };
                gateway.approve_token(amount).await?
            }
            Command::ApproveCollection => gateway.approve_collection().await?,
            other => {
                return Err(AppError::Config(format!("{other:?} is not a contract action")));
            }
        };

        self.finish(&gateway, pending, cancel).await
    }

    async fn finish(
        &self,
        gateway: &ContractGateway,
        mut pending: PendingTransaction,
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        let explorer = self.config.network.explorer_tx_url(&pending.hash);
        write_submitted(&pending, &explorer, self.json, &mut io::stdout())?;
        if !self.wait {
            return Ok(());
        }

        let hash = pending.hash;
        let intent = pending.intent;
        tokio::select! {
            _ = cancel.cancelled() => {
                warn!("{}", pending_hint(&hash, &explorer));
                Err(AppError::Interrupted(format!("{intent} confirmation")))
            }
            result = gateway.await_confirmation(&mut pending) => {
                let confirmation = result?;
                write_confirmation(&confirmation, self.json, &mut io::stdout())
            }
        }
    }

    async fn status(&self, full: bool) -> Result<(), AppError> {
        self.connection.auto_reconnect().await;
        let state = self.connection.state();
        let network = self.connection.network();

        let mut report = StatusReport {
            account: state.account(),
            chain_id: state.chain_id(),
            connected: state.is_connected(),
            ready: state.is_ready(),
            network: network.name.clone(),
            required_chain_id: network.chain_id,
            ..Default::default()
        };

        if state.is_ready() {
            let gateway = self.gateway()?;
            if self.config.contracts.token.is_some() {
                report.token_balance = Some(gateway.format_token(gateway.token_balance().await?));
                if full {
                    let approval = gateway.token_approval().await?;
                    report.token_allowance = approval.allowance.map(|a| gateway.format_token(a));
                }
            }
            report.staked_balance = Some(gateway.format_token(gateway.staked_balance().await?));
            report.pending_reward = gateway
                .pending_reward()
                .await?
                .map(|r| gateway.format_token(r));
            if full && self.config.contracts.collection.is_some() {
                report.collection_approved = Some(gateway.collection_approval().await?.approved);
            }
        }

        write_status(&report, self.json, &mut io::stdout())
    }

    async fn watch(&self, cancel: CancellationToken) -> Result<(), AppError> {
        let mut states = self.connection.subscribe_state();
        let listener = self.connection.listen()?;
        self.wallet.start_polling(self.config.event_poll_interval);

        self.connection.auto_reconnect().await;
        let current = *states.borrow_and_update();
        write_state(&current, self.json, &mut io::stdout())?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *states.borrow_and_update();
                    write_state(&state, self.json, &mut io::stdout())?;
                }
            }
        }

        listener.stop();
        self.wallet.close();
        info!("watch stopped");
        Ok(())
    }
}

/// Build the client configuration from flags, falling back to `env` for
/// contract addresses.
pub fn build_config(
    args: &GlobalArgs,
    env: impl Fn(&str) -> Option<String>,
) -> Result<DappConfig, AppError> {
    let mut config = DappConfig {
        token_decimals: args.decimals,
        confirmation_timeout: Duration::from_secs(args.confirm_timeout_secs),
        ..Default::default()
    };

    let token = args.token.clone().or_else(|| env("ENA_TOKEN_ADDRESS"));
    config.contracts.token = token.map(|t| parse_address(&t, "token")).transpose()?;

    let collection = args
        .collection
        .clone()
        .or_else(|| env("ENA_COLLECTION_ADDRESS"));
    config.contracts.collection = collection
        .map(|c| parse_address(&c, "collection"))
        .transpose()?;

    Ok(config)
}

fn parse_address(value: &str, name: &str) -> Result<Address, AppError> {
    Address::from_str(value.trim())
        .map_err(|e| AppError::Config(format!("invalid {name} address {value:?}: {e}")))
}
