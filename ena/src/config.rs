use std::time::Duration;

use alloy_primitives::{address, Address};
use serde::{Deserialize, Serialize};

use crate::error::{EnaError, Result};

/// Soneium Mainnet chain id.
pub const SONEIUM_CHAIN_ID: u64 = 1868;

/// Default ERC-20 precision for staking amounts.
pub const DEFAULT_TOKEN_DECIMALS: u32 = 18;

/// NFT staking contract on Soneium Mainnet.
pub const NFT_STAKING_ADDRESS: Address = address!("32FE8378aa41De37F96D7578a313711500836bfB");

/// Token staking contract on Soneium Mainnet.
pub const TOKEN_STAKING_ADDRESS: Address = address!("29EeF959733826F5B4BaD0B367009D2bb452fFBb");

/// Native currency of a chain, as the wallet expects it in `wallet_addEthereumChain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// The single network every contract action requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRequirement {
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
    pub explorer_url: String,
    pub native_currency: NativeCurrency,
}

impl NetworkRequirement {
    /// Soneium Mainnet.
    pub fn soneium_mainnet() -> Self {
        Self {
            chain_id: SONEIUM_CHAIN_ID,
            name: "Soneium Mainnet".into(),
            rpc_url: "https://rpc.soneium.org".into(),
            explorer_url: "https://explorer.soneium.org".into(),
            native_currency: NativeCurrency {
                name: "Ether".into(),
                symbol: "ETH".into(),
                decimals: 18,
            },
        }
    }

    /// Chain id in the hex form wallets expect (`0x74C` for 1868).
    pub fn chain_id_hex(&self) -> String {
        crate::units::to_chain_id_hex(self.chain_id)
    }

    /// Descriptor sent with `wallet_addEthereumChain`.
    pub fn descriptor(&self) -> ChainDescriptor {
        ChainDescriptor {
            chain_id: self.chain_id_hex(),
            chain_name: self.name.clone(),
            native_currency: self.native_currency.clone(),
            rpc_urls: vec![self.rpc_url.clone()],
            block_explorer_urls: vec![self.explorer_url.clone()],
        }
    }

    /// Explorer link for a transaction hash.
    pub fn explorer_tx_url(&self, hash: &impl std::fmt::Display) -> String {
        format!("{}/tx/{hash}", self.explorer_url.trim_end_matches('/'))
    }
}

impl Default for NetworkRequirement {
    fn default() -> Self {
        Self::soneium_mainnet()
    }
}

/// EIP-3085 chain descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainDescriptor {
    pub chain_id: String,
    pub chain_name: String,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<String>,
    pub block_explorer_urls: Vec<String>,
}

/// Deployed contract addresses used by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractAddresses {
    pub nft_staking: Address,
    pub token_staking: Address,
    /// ERC-20 staked by the token staking contract.
    pub token: Option<Address>,
    /// ERC-1155 collection staked by the NFT staking contract.
    pub collection: Option<Address>,
}

impl ContractAddresses {
    pub fn token(&self) -> Result<Address> {
        self.token
            .ok_or_else(|| EnaError::Config("ERC-20 token address not configured".into()))
    }

    pub fn collection(&self) -> Result<Address> {
        self.collection
            .ok_or_else(|| EnaError::Config("ERC-1155 collection address not configured".into()))
    }
}

impl Default for ContractAddresses {
    fn default() -> Self {
        Self {
            nft_staking: NFT_STAKING_ADDRESS,
            token_staking: TOKEN_STAKING_ADDRESS,
            token: None,
            collection: None,
        }
    }
}

/// What the connection manager does when the wallet reports a chain other
/// than the required one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChainChangePolicy {
    /// Mark the session as on the wrong network and wait for an explicit
    /// `ensure_network`.
    #[default]
    Revalidate,
    /// Immediately ask the wallet to switch back.
    AutoSwitch,
    /// Drop the session entirely.
    Reset,
}

/// Configuration for the staking client.
///
/// Use [`Default::default()`] for Soneium Mainnet, then fill in the token and
/// collection addresses.
#[derive(Debug, Clone)]
pub struct DappConfig {
    pub network: NetworkRequirement,
    pub contracts: ContractAddresses,
    /// Decimals of the staked ERC-20.
    pub token_decimals: u32,
    /// Interval between `eth_getTransactionReceipt` polls.
    pub receipt_poll_interval: Duration,
    /// Give up waiting for a receipt after this long.
    pub confirmation_timeout: Duration,
    /// Interval for synthesizing wallet notifications by polling.
    pub event_poll_interval: Duration,
    pub chain_change_policy: ChainChangePolicy,
}

impl Default for DappConfig {
    fn default() -> Self {
        Self {
            network: NetworkRequirement::soneium_mainnet(),
            contracts: ContractAddresses::default(),
            token_decimals: DEFAULT_TOKEN_DECIMALS,
            receipt_poll_interval: Duration::from_secs(2),
            confirmation_timeout: Duration::from_secs(5 * 60),
            event_poll_interval: Duration::from_secs(4),
            chain_change_policy: ChainChangePolicy::Revalidate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soneium_descriptor() {
        let network = NetworkRequirement::soneium_mainnet();
        let d = network.descriptor();
        assert_eq!(d.chain_id, "0x74C");
        assert_eq!(d.chain_name, "Soneium Mainnet");
        assert_eq!(d.rpc_urls, vec!["https://rpc.soneium.org".to_string()]);
        assert_eq!(d.native_currency.decimals, 18);
    }

    #[test]
    fn test_descriptor_serializes_camel_case() {
        let json = serde_json::to_value(NetworkRequirement::default().descriptor()).unwrap();
        assert_eq!(json["chainId"], "0x74C");
        assert_eq!(json["nativeCurrency"]["symbol"], "ETH");
        assert_eq!(
            json["blockExplorerUrls"][0],
            "https://explorer.soneium.org"
        );
    }

    #[test]
    fn test_explorer_tx_url() {
        let network = NetworkRequirement::soneium_mainnet();
        assert_eq!(
            network.explorer_tx_url(&"0xabc"),
            "https://explorer.soneium.org/tx/0xabc"
        );
    }

    #[test]
    fn test_missing_token_address() {
        let contracts = ContractAddresses::default();
        assert!(matches!(contracts.token(), Err(EnaError::Config(_))));
        assert!(matches!(contracts.collection(), Err(EnaError::Config(_))));
    }

    #[test]
    fn test_default_config() {
        let cfg = DappConfig::default();
        assert_eq!(cfg.network.chain_id, SONEIUM_CHAIN_ID);
        assert_eq!(cfg.token_decimals, 18);
        assert_eq!(cfg.chain_change_policy, ChainChangePolicy::Revalidate);
        assert_eq!(cfg.contracts.nft_staking, NFT_STAKING_ADDRESS);
    }
}
