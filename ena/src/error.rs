use alloy_primitives::B256;
use thiserror::Error;

use crate::provider::RpcError;

#[derive(Error, Debug)]
pub enum EnaError {
    #[error("wallet unavailable: {0}")]
    WalletUnavailable(String),

    #[error("request rejected by user: {0}")]
    UserRejected(String),

    #[error("wrong network: expected chain {expected}, wallet is on {}", display_chain(.actual))]
    WrongNetwork { expected: u64, actual: Option<u64> },

    #[error("network switch failed: {0}")]
    NetworkSwitchFailed(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not ready: {0}")]
    NotReady(String),

    #[error("transaction submission failed: {0}")]
    SubmissionFailed(String),

    #[error("transaction {hash} failed: {reason}")]
    ExecutionFailed { hash: B256, reason: String },

    #[error("wallet RPC error: {0}")]
    Rpc(RpcError),

    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("ABI error: {0}")]
    Abi(#[from] alloy_sol_types::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EnaError {
    /// JSON-RPC error code when the failure came back from the wallet.
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            EnaError::Rpc(e) => Some(e.code),
            _ => None,
        }
    }

    /// True when the wallet never answered (no endpoint, connection refused,
    /// non-2xx status).
    pub fn is_transport(&self) -> bool {
        matches!(self, EnaError::Request(_) | EnaError::Http { .. })
    }
}

impl From<RpcError> for EnaError {
    fn from(e: RpcError) -> Self {
        EnaError::Rpc(e)
    }
}

fn display_chain(chain: &Option<u64>) -> String {
    match chain {
        Some(id) => id.to_string(),
        None => "an unknown chain".into(),
    }
}

pub type Result<T> = std::result::Result<T, EnaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrong_network_message() {
        let err = EnaError::WrongNetwork {
            expected: 1868,
            actual: Some(1),
        };
        assert_eq!(
            err.to_string(),
            "wrong network: expected chain 1868, wallet is on 1"
        );

        let err = EnaError::WrongNetwork {
            expected: 1868,
            actual: None,
        };
        assert!(err.to_string().ends_with("an unknown chain"));
    }

    #[test]
    fn test_rpc_code() {
        let err: EnaError = RpcError::new(4001, "User rejected the request.").into();
        assert_eq!(err.rpc_code(), Some(4001));
        assert!(!err.is_transport());
        assert_eq!(EnaError::NotReady("x".into()).rpc_code(), None);
    }

    #[test]
    fn test_http_is_transport() {
        let err = EnaError::Http {
            status: 502,
            message: "bad gateway".into(),
        };
        assert!(err.is_transport());
    }
}
