//! Staking actions and the read-only queries that go with them.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use alloy_sol_types::SolCall;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{ContractAddresses, DappConfig};
use crate::connection::ConnectionManager;
use crate::contracts::{
    decode_return, ContractBinding, ContractKind, IERC1155, IERC20, INftStaking, ITokenStaking,
};
use crate::error::{EnaError, Result};
use crate::provider::RpcError;
use crate::tx::{Confirmation, PendingTransaction, TransactionTracker, TxIntent};
use crate::units::{format_units, parse_amount, parse_integer};

/// How much of the staking token the staking contract may pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalAmount {
    /// Exactly this many base units.
    Exact(U256),
    /// `type(uint256).max`.
    Unlimited,
}

impl ApprovalAmount {
    /// Exact approval from a user-entered decimal amount.
    pub fn parse(input: &str, decimals: u32) -> Result<Self> {
        parse_amount(input, decimals).map(Self::Exact)
    }

    pub fn value(&self) -> U256 {
        match self {
            Self::Exact(amount) => *amount,
            Self::Unlimited => U256::MAX,
        }
    }
}

/// Approval status of the connected account towards a staking contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ApprovalState {
    pub owner: Address,
    pub spender: Address,
    pub asset: Address,
    pub approved: bool,
    /// ERC-20 allowance; `None` for ERC-1155 operator approvals.
    pub allowance: Option<U256>,
}

impl ApprovalState {
    /// True when the allowance covers `amount` (or the operator is approved).
    pub fn covers(&self, amount: U256) -> bool {
        match self.allowance {
            Some(allowance) => allowance >= amount,
            None => self.approved,
        }
    }
}

/// Builds, validates, and submits every staking action.
///
/// Submissions are serialized: a second action waits until the first one
/// has a hash (or failed). Confirmations are awaited independently.
pub struct ContractGateway {
    connection: Arc<ConnectionManager>,
    tracker: TransactionTracker,
    contracts: ContractAddresses,
    token_decimals: u32,
    submit_lock: Mutex<()>,
}

impl ContractGateway {
    pub fn new(
        connection: Arc<ConnectionManager>,
        tracker: TransactionTracker,
        contracts: ContractAddresses,
        token_decimals: u32,
    ) -> Self {
        Self {
            connection,
            tracker,
            contracts,
            token_decimals,
            submit_lock: Mutex::new(()),
        }
    }

    /// Gateway over the connection's wallet with the configured contracts
    /// and receipt polling.
    pub fn from_config(connection: Arc<ConnectionManager>, config: &DappConfig) -> Result<Self> {
        let provider = Arc::clone(connection.provider()?);
        let tracker = TransactionTracker::new(
            provider,
            config.receipt_poll_interval,
            config.confirmation_timeout,
        );
        Ok(Self::new(
            connection,
            tracker,
            config.contracts.clone(),
            config.token_decimals,
        ))
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn contracts(&self) -> &ContractAddresses {
        &self.contracts
    }

    pub fn token_decimals(&self) -> u32 {
        self.token_decimals
    }

    /// Render a token amount for display.
    pub fn format_token(&self, amount: U256) -> String {
        format_units(amount, self.token_decimals)
    }

    // ---- NFT staking ----

    /// Stake `amount` copies of ERC-1155 `token_id`. Both are whole numbers.
    pub async fn stake_nft(&self, token_id: &str, amount: &str) -> Result<PendingTransaction> {
        self.connection.ready_session()?;
        let token_id = parse_integer(token_id, "token id")?;
        let amount = parse_integer(amount, "amount")?;
        if amount.is_zero() {
            return Err(EnaError::InvalidInput("amount must be greater than zero".into()));
        }
        self.send(
            self.nft_staking(),
            INftStaking::stakeCall {
                tokenId: token_id,
                amount,
            },
            TxIntent::Stake,
        )
        .await
    }

    /// Unstake the position at `index`.
    pub async fn unstake_nft(&self, index: &str) -> Result<PendingTransaction> {
        self.connection.ready_session()?;
        let index = parse_integer(index, "stake index")?;
        self.send(
            self.nft_staking(),
            INftStaking::unstakeCall { index },
            TxIntent::Unstake,
        )
        .await
    }

    pub async fn claim_all(&self) -> Result<PendingTransaction> {
        self.connection.ready_session()?;
        self.send(self.nft_staking(), INftStaking::claimAllCall {}, TxIntent::Claim)
            .await
    }

    // ---- Token staking ----

    /// Stake a decimal token amount (`"1.5"`).
    pub async fn stake_tokens(&self, amount: &str) -> Result<PendingTransaction> {
        self.connection.ready_session()?;
        let amount = parse_amount(amount, self.token_decimals)?;
        self.send(
            self.token_staking(),
            ITokenStaking::stakeCall { amount },
            TxIntent::Stake,
        )
        .await
    }

    /// Withdraw a decimal token amount from the staked balance.
    pub async fn withdraw(&self, amount: &str) -> Result<PendingTransaction> {
        self.connection.ready_session()?;
        let amount = parse_amount(amount, self.token_decimals)?;
        self.send(
            self.token_staking(),
            ITokenStaking::withdrawCall { amount },
            TxIntent::Withdraw,
        )
        .await
    }

    pub async fn claim(&self) -> Result<PendingTransaction> {
        self.connection.ready_session()?;
        self.send(self.token_staking(), ITokenStaking::claimCall {}, TxIntent::Claim)
            .await
    }

    // ---- Approvals ----

    /// Let the token staking contract pull the staking token.
    pub async fn approve_token(&self, amount: ApprovalAmount) -> Result<PendingTransaction> {
        self.connection.ready_session()?;
        let token = self.token()?;
        let value = amount.value();
        match amount {
            ApprovalAmount::Exact(v) if v.is_zero() => {
                return Err(EnaError::InvalidInput(
                    "approval amount must be greater than zero".into(),
                ));
            }
            ApprovalAmount::Exact(v) => {
                debug!(amount = %self.format_token(v), "exact token approval");
            }
            ApprovalAmount::Unlimited => {
                warn!(
                    spender = %self.contracts.token_staking,
                    "granting unlimited token allowance"
                );
            }
        }
        self.send(
            token,
            IERC20::approveCall {
                spender: self.contracts.token_staking,
                amount: value,
            },
            TxIntent::Approve,
        )
        .await
    }

    /// Let the NFT staking contract move every token of the collection.
    pub async fn approve_collection(&self) -> Result<PendingTransaction> {
        self.connection.ready_session()?;
        let collection = self.collection()?;
        self.send(
            collection,
            IERC1155::setApprovalForAllCall {
                operator: self.contracts.nft_staking,
                approved: true,
            },
            TxIntent::Approve,
        )
        .await
    }

    /// Wait for an action returned by this gateway to be mined.
    pub async fn await_confirmation(&self, pending: &mut PendingTransaction) -> Result<Confirmation> {
        self.tracker.await_confirmation(pending).await
    }

    // ---- Reads ----

    pub async fn token_approval(&self) -> Result<ApprovalState> {
        let token = self.token()?;
        let spender = self.contracts.token_staking;
        let (owner, allowance) = self
            .read(token, |owner| IERC20::allowanceCall { owner, spender })
            .await?;
        Ok(ApprovalState {
            owner,
            spender,
            asset: token.address,
            approved: !allowance._0.is_zero(),
            allowance: Some(allowance._0),
        })
    }

    pub async fn collection_approval(&self) -> Result<ApprovalState> {
        let collection = self.collection()?;
        let operator = self.contracts.nft_staking;
        let (owner, approved) = self
            .read(collection, |account| IERC1155::isApprovedForAllCall {
                account,
                operator,
            })
            .await?;
        Ok(ApprovalState {
            owner,
            spender: operator,
            asset: collection.address,
            approved: approved._0,
            allowance: None,
        })
    }

    /// Tokens currently staked by the connected account.
    pub async fn staked_balance(&self) -> Result<U256> {
        let (_, balance) = self
            .read(self.token_staking(), |account| ITokenStaking::balancesCall {
                account,
            })
            .await?;
        Ok(balance._0)
    }

    /// Staking token held by the connected account.
    pub async fn token_balance(&self) -> Result<U256> {
        let token = self.token()?;
        let (_, balance) = self
            .read(token, |account| IERC20::balanceOfCall { account })
            .await?;
        Ok(balance._0)
    }

    /// Unclaimed reward, or `None` when the contract has no `pendingReward`.
    pub async fn pending_reward(&self) -> Result<Option<U256>> {
        match self
            .read(self.token_staking(), |account| ITokenStaking::pendingRewardCall {
                account,
            })
            .await
        {
            Ok((_, reward)) => Ok(Some(reward._0)),
            Err(EnaError::Rpc(e)) if e.code == RpcError::EXECUTION_REVERTED => {
                debug!(error = %e, "pendingReward not available");
                Ok(None)
            }
            Err(EnaError::Abi(e)) => {
                debug!(error = %e, "pendingReward returned no data");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    // ---- Internals ----

    fn nft_staking(&self) -> ContractBinding {
        ContractBinding::new(self.contracts.nft_staking, ContractKind::NftStaking)
    }

    fn token_staking(&self) -> ContractBinding {
        ContractBinding::new(self.contracts.token_staking, ContractKind::TokenStaking)
    }

    fn token(&self) -> Result<ContractBinding> {
        Ok(ContractBinding::new(self.contracts.token()?, ContractKind::Erc20))
    }

    fn collection(&self) -> Result<ContractBinding> {
        Ok(ContractBinding::new(
            self.contracts.collection()?,
            ContractKind::Erc1155,
        ))
    }

    /// Connected account, after confirming the wallet is still on the
    /// required chain right now.
    async fn signer(&self) -> Result<Address> {
        let (account, _) = self.connection.ready_session()?;
        let live = self.connection.provider()?.chain_id().await?;
        let expected = self.connection.network().chain_id;
        if live != expected {
            self.connection.observe_chain(live);
            return Err(EnaError::WrongNetwork {
                expected,
                actual: Some(live),
            });
        }
        Ok(account)
    }

    async fn send<C: SolCall>(
        &self,
        contract: ContractBinding,
        call: C,
        intent: TxIntent,
    ) -> Result<PendingTransaction> {
        let _guard = self.submit_lock.lock().await;
        let signer = self.signer().await?;
        let request = contract.bind(signer).request(&call);
        info!(
            %intent,
            contract = %contract.kind,
            address = %contract.address,
            function = C::SIGNATURE,
            "submitting transaction"
        );
        self.tracker.submit(request, intent).await
    }

    async fn read<C: SolCall>(
        &self,
        contract: ContractBinding,
        build: impl FnOnce(Address) -> C,
    ) -> Result<(Address, C::Return)> {
        let owner = self.signer().await?;
        let request = contract.bind(owner).request(&build(owner));
        let data = self.connection.provider()?.call(&request).await?;
        Ok((owner, decode_return::<C>(&data)?))
    }
}
