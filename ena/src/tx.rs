//! Transaction lifecycle: submission, confirmation, failure.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::error::{EnaError, Result};
use crate::provider::{RpcError, TransactionRequest, WalletProvider};

/// What a transaction is meant to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxIntent {
    Stake,
    Unstake,
    Claim,
    Withdraw,
    Approve,
}

impl fmt::Display for TxIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxIntent::Stake => "stake",
            TxIntent::Unstake => "unstake",
            TxIntent::Claim => "claim",
            TxIntent::Withdraw => "withdraw",
            TxIntent::Approve => "approve",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Submitted,
    Confirmed,
    Failed,
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxStatus::Submitted => "submitted",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One in-flight submission. Never reused once settled.
#[derive(Debug, Clone, Serialize)]
pub struct PendingTransaction {
    pub hash: B256,
    pub intent: TxIntent,
    pub status: TxStatus,
    pub from: Address,
    pub to: Address,
    pub submitted_at: DateTime<Utc>,
}

impl PendingTransaction {
    pub fn is_settled(&self) -> bool {
        self.status != TxStatus::Submitted
    }
}

/// Inclusion data for a confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Confirmation {
    pub hash: B256,
    pub intent: TxIntent,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
}

/// Submits transactions through the wallet and waits for their receipts.
#[derive(Clone)]
pub struct TransactionTracker {
    provider: Arc<dyn WalletProvider>,
    poll_interval: Duration,
    timeout: Duration,
}

impl TransactionTracker {
    pub fn new(provider: Arc<dyn WalletProvider>, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            provider,
            poll_interval,
            timeout,
        }
    }

    /// Ask the wallet to sign and broadcast `request`.
    ///
    /// # Errors
    ///
    /// `UserRejected` when the signing prompt is dismissed; `SubmissionFailed`
    /// for any other wallet, RPC, or pre-broadcast revert error. No
    /// [`PendingTransaction`] exists in either case.
    pub async fn submit(&self, request: TransactionRequest, intent: TxIntent) -> Result<PendingTransaction> {
        debug!(%intent, to = %request.to, "requesting signature");

        let hash = self
            .provider
            .send_transaction(&request)
            .await
            .map_err(submission_error)?;

        info!(%intent, %hash, "transaction submitted");
        Ok(PendingTransaction {
            hash,
            intent,
            status: TxStatus::Submitted,
            from: request.from,
            to: request.to,
            submitted_at: Utc::now(),
        })
    }

    /// Wait until `pending` is mined, then record the outcome on it.
    ///
    /// # Errors
    ///
    /// `ExecutionFailed` when the receipt reports a revert or no receipt
    /// arrives within the timeout. Awaiting a settled transaction is
    /// `InvalidInput`.
    pub async fn await_confirmation(&self, pending: &mut PendingTransaction) -> Result<Confirmation> {
        if pending.is_settled() {
            return Err(EnaError::InvalidInput(format!(
                "transaction {} already {}",
                pending.hash, pending.status
            )));
        }

        let deadline = Instant::now() + self.timeout;
        let hash = pending.hash;

        loop {
            match self.provider.transaction_receipt(hash).await {
                Ok(Some(receipt)) if receipt.succeeded() => {
                    pending.status = TxStatus::Confirmed;
                    let confirmation = Confirmation {
                        hash,
                        intent: pending.intent,
                        block_number: receipt.block_number(),
                        gas_used: receipt.gas_used(),
                    };
                    info!(
                        intent = %pending.intent,
                        %hash,
                        block = ?confirmation.block_number,
                        "transaction confirmed"
                    );
                    return Ok(confirmation);
                }
                Ok(Some(receipt)) => {
                    pending.status = TxStatus::Failed;
                    let reason = match receipt.block_number() {
                        Some(block) => format!("reverted in block {block}"),
                        None => "reverted".to_string(),
                    };
                    warn!(intent = %pending.intent, %hash, %reason, "transaction failed");
                    return Err(EnaError::ExecutionFailed { hash, reason });
                }
                Ok(None) => {}
                Err(e) => {
                    // Receipt lookups are reads; a flaky wallet just delays us.
                    debug!(%hash, error = %e, "receipt lookup failed");
                }
            }

            if Instant::now() + self.poll_interval > deadline {
                pending.status = TxStatus::Failed;
                let reason = format!("not mined within {:?}", self.timeout);
                warn!(intent = %pending.intent, %hash, %reason, "transaction failed");
                return Err(EnaError::ExecutionFailed { hash, reason });
            }
            time::sleep(self.poll_interval).await;
        }
    }

    /// Submit and wait for confirmation in one step.
    pub async fn submit_and_confirm(
        &self,
        request: TransactionRequest,
        intent: TxIntent,
    ) -> Result<(PendingTransaction, Confirmation)> {
        let mut pending = self.submit(request, intent).await?;
        let confirmation = self.await_confirmation(&mut pending).await?;
        Ok((pending, confirmation))
    }
}

/// Classify a failed `eth_sendTransaction`.
fn submission_error(err: EnaError) -> EnaError {
    match err {
        EnaError::Rpc(e) if e.is_user_rejection() => EnaError::UserRejected(e.message),
        EnaError::Rpc(e) => EnaError::SubmissionFailed(describe_rpc_error(&e)),
        other => EnaError::SubmissionFailed(other.to_string()),
    }
}

fn describe_rpc_error(e: &RpcError) -> String {
    match e.revert_reason() {
        Some(reason) => format!("execution reverted: {reason}"),
        None => e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::ITokenStaking;
    use crate::provider::MemoryWallet;
    use alloy_primitives::{address, hex};
    use alloy_sol_types::{Revert, SolCall, SolError};
    use serde_json::json;

    const USER: Address = address!("00000000000000000000000000000000000000aa");
    const STAKING: Address = address!("00000000000000000000000000000000000000bb");

    fn setup() -> (Arc<MemoryWallet>, TransactionTracker) {
        let wallet = Arc::new(MemoryWallet::new(vec![USER], 1868));
        wallet.authorize();
        let tracker = TransactionTracker::new(
            wallet.clone(),
            Duration::from_secs(1),
            Duration::from_secs(10),
        );
        (wallet, tracker)
    }

    fn claim_request() -> TransactionRequest {
        TransactionRequest::new(USER, STAKING, ITokenStaking::claimCall {}.abi_encode())
    }

    #[tokio::test]
    async fn test_submit_and_confirm() {
        let (_wallet, tracker) = setup();

        let mut pending = tracker.submit(claim_request(), TxIntent::Claim).await.unwrap();
        assert_eq!(pending.status, TxStatus::Submitted);
        assert_eq!(pending.from, USER);
        assert_eq!(pending.to, STAKING);

        let confirmation = tracker.await_confirmation(&mut pending).await.unwrap();
        assert_eq!(pending.status, TxStatus::Confirmed);
        assert_eq!(confirmation.hash, pending.hash);
        assert_eq!(confirmation.intent, TxIntent::Claim);
        assert!(confirmation.block_number.is_some());
    }

    #[tokio::test]
    async fn test_user_rejection_creates_no_pending() {
        let (wallet, tracker) = setup();
        wallet.reject_next_request();

        let err = tracker.submit(claim_request(), TxIntent::Claim).await.unwrap_err();
        assert!(matches!(err, EnaError::UserRejected(_)));
    }

    #[tokio::test]
    async fn test_submission_failure_surfaces_revert_reason() {
        let (wallet, tracker) = setup();
        let payload = Revert {
            reason: "nothing to claim".into(),
        }
        .abi_encode();
        wallet.fail_next_send(
            RpcError::new(RpcError::EXECUTION_REVERTED, "execution reverted")
                .with_data(json!(hex::encode_prefixed(payload))),
        );

        let err = tracker.submit(claim_request(), TxIntent::Claim).await.unwrap_err();
        match err {
            EnaError::SubmissionFailed(msg) => assert!(msg.contains("nothing to claim"), "{msg}"),
            other => panic!("expected SubmissionFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_generic_rpc_failure() {
        let (wallet, tracker) = setup();
        wallet.fail_next_send(RpcError::new(-32000, "insufficient funds for gas"));

        let err = tracker.submit(claim_request(), TxIntent::Claim).await.unwrap_err();
        match err {
            EnaError::SubmissionFailed(msg) => assert!(msg.contains("insufficient funds")),
            other => panic!("expected SubmissionFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_on_chain_revert_is_execution_failure() {
        let (wallet, tracker) = setup();
        wallet.revert_next();

        let mut pending = tracker.submit(claim_request(), TxIntent::Claim).await.unwrap();
        let err = tracker.await_confirmation(&mut pending).await.unwrap_err();
        assert!(matches!(err, EnaError::ExecutionFailed { hash, .. } if hash == pending.hash));
        assert_eq!(pending.status, TxStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_mined_times_out() {
        let (wallet, tracker) = setup();
        wallet.set_mining(false);

        let mut pending = tracker.submit(claim_request(), TxIntent::Claim).await.unwrap();
        let err = tracker.await_confirmation(&mut pending).await.unwrap_err();
        match err {
            EnaError::ExecutionFailed { reason, .. } => assert!(reason.contains("not mined")),
            other => panic!("expected ExecutionFailed, got {other:?}"),
        }
        assert_eq!(pending.status, TxStatus::Failed);
    }

    #[tokio::test]
    async fn test_settled_transaction_is_not_reused() {
        let (_wallet, tracker) = setup();
        let (mut pending, _) = tracker
            .submit_and_confirm(claim_request(), TxIntent::Claim)
            .await
            .unwrap();

        let err = tracker.await_confirmation(&mut pending).await.unwrap_err();
        assert!(matches!(err, EnaError::InvalidInput(_)));
    }

    #[test]
    fn test_intent_display() {
        assert_eq!(TxIntent::Withdraw.to_string(), "withdraw");
        assert_eq!(TxStatus::Confirmed.to_string(), "confirmed");
    }
}
