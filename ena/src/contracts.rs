//! Fixed contract ABIs and per-signer bindings.

use std::fmt;

use alloy_primitives::Address;
use alloy_sol_types::{sol, SolCall};
use serde::Serialize;

use crate::error::Result;
use crate::provider::TransactionRequest;

sol! {
    interface INftStaking {
        function stake(uint256 tokenId, uint256 amount) external;
        function unstake(uint256 index) external;
        function claimAll() external;
    }

    interface ITokenStaking {
        function stake(uint256 amount) external;
        function withdraw(uint256 amount) external;
        function claim() external;
        function balances(address account) external view returns (uint256);
        function pendingReward(address account) external view returns (uint256);
    }

    interface IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
        function allowance(address owner, address spender) external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
    }

    interface IERC1155 {
        function isApprovedForAll(address account, address operator) external view returns (bool);
        function setApprovalForAll(address operator, bool approved) external;
    }
}

/// Which ABI a deployed contract speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    NftStaking,
    TokenStaking,
    Erc20,
    Erc1155,
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContractKind::NftStaking => "nft-staking",
            ContractKind::TokenStaking => "token-staking",
            ContractKind::Erc20 => "erc20",
            ContractKind::Erc1155 => "erc1155",
        };
        f.write_str(name)
    }
}

/// A deployed contract: address plus interface shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContractBinding {
    pub address: Address,
    pub kind: ContractKind,
}

impl ContractBinding {
    pub fn new(address: Address, kind: ContractKind) -> Self {
        Self { address, kind }
    }

    /// Bind to the account that will sign calls.
    pub fn bind(self, signer: Address) -> BoundContract {
        BoundContract {
            binding: self,
            signer,
        }
    }
}

/// A contract binding tied to one signer account.
///
/// Built per action from the current session so it never outlives an
/// account change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundContract {
    pub binding: ContractBinding,
    pub signer: Address,
}

impl BoundContract {
    pub fn address(&self) -> Address {
        self.binding.address
    }

    pub fn kind(&self) -> ContractKind {
        self.binding.kind
    }

    /// Encode `call` into a request from the bound signer.
    pub fn request<C: SolCall>(&self, call: &C) -> TransactionRequest {
        TransactionRequest::new(self.signer, self.binding.address, call.abi_encode())
    }
}

/// Decode the return data of a view call.
pub fn decode_return<C: SolCall>(data: &[u8]) -> Result<C::Return> {
    Ok(C::abi_decode_returns(data, true)?)
}
