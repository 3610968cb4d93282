pub mod config;
pub mod connection;
pub mod contracts;
pub mod error;
pub mod gateway;
pub mod provider;
pub mod tx;
pub mod units;

// ---- Top-level re-exports for ergonomic usage ----

// Configuration
pub use config::{
    ChainChangePolicy, ContractAddresses, DappConfig, NetworkRequirement, SONEIUM_CHAIN_ID,
};
pub use error::{EnaError, Result};

// Connection
pub use connection::{ConnectionManager, ConnectionState, ListenerHandle, Session};

// Contract actions
pub use contracts::{ContractBinding, ContractKind};
pub use gateway::{ApprovalAmount, ApprovalState, ContractGateway};

// Transactions
pub use tx::{Confirmation, PendingTransaction, TransactionTracker, TxIntent, TxStatus};

// Wallets
pub use provider::{
    HttpWalletProvider, RpcError, TransactionReceipt, TransactionRequest, WalletEvent,
    WalletProvider, WalletSubscription,
};
#[cfg(any(test, feature = "test-util"))]
pub use provider::MemoryWallet;
