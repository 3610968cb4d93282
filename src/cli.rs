use clap::{Args, Parser, Subcommand, ValueEnum};
use ena::ChainChangePolicy;

/// ena: stake NFTs and tokens on Soneium through a connected wallet.
#[derive(Parser, Debug)]
#[command(name = "ena", version)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Wallet JSON-RPC endpoint (falls back to ENA_WALLET_URL)
    #[arg(long, global = true)]
    pub wallet_url: Option<String>,

    /// ERC-20 token staked by the token staking contract (falls back to ENA_TOKEN_ADDRESS)
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// ERC-1155 collection staked by the NFT staking contract (falls back to ENA_COLLECTION_ADDRESS)
    #[arg(long, global = true)]
    pub collection: Option<String>,

    /// Decimals of the staking token
    #[arg(long, default_value = "18", global = true)]
    pub decimals: u32,

    /// Give up waiting for a receipt after this many seconds
    #[arg(long, default_value = "300", global = true)]
    pub confirm_timeout_secs: u64,

    /// Return after submission instead of waiting for confirmation
    #[arg(long, global = true)]
    pub no_wait: bool,

    /// Output as JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the wallet session, approvals and balances
    Status,

    /// Ask the wallet for account access
    Connect,

    /// Switch the wallet to Soneium Mainnet, registering it if needed
    SwitchNetwork,

    /// Stake ERC-1155 tokens in the NFT staking contract
    StakeNft {
        /// Token id within the collection
        token_id: String,
        /// Number of copies to stake
        amount: String,
    },

    /// Unstake an NFT position by index
    UnstakeNft {
        /// Index of the stake position
        index: String,
    },

    /// Claim rewards for every staked NFT
    ClaimAll,

    /// Stake tokens (decimal amount, e.g. 1.5)
    Stake { amount: String },

    /// Withdraw staked tokens (decimal amount)
    Withdraw { amount: String },

    /// Claim token staking rewards
    Claim,

    /// Approve the token staking contract to pull tokens
    ApproveToken {
        /// Exact amount to approve (decimal)
        #[arg(long, required_unless_present = "unlimited", conflicts_with = "unlimited")]
        amount: Option<String>,

        /// Approve the maximum uint256 instead of an exact amount
        #[arg(long)]
        unlimited: bool,
    },

    /// Approve the NFT staking contract as operator for the collection
    ApproveCollection,

    /// Show token, staked and reward balances
    Balance,

    /// Follow wallet account and network changes until interrupted
    Watch {
        /// What to do when the wallet leaves Soneium
        #[arg(long, value_enum, default_value = "revalidate")]
        on_chain_change: PolicyArg,
    },
}

impl Command {
    /// Policy for wallet network changes. Only `watch` listens for them.
    pub fn chain_change_policy(&self) -> ChainChangePolicy {
        match self {
            Command::Watch { on_chain_change } => (*on_chain_change).into(),
            _ => ChainChangePolicy::default(),
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyArg {
    Revalidate,
    AutoSwitch,
    Reset,
}

impl From<PolicyArg> for ChainChangePolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Revalidate => ChainChangePolicy::Revalidate,
            PolicyArg::AutoSwitch => ChainChangePolicy::AutoSwitch,
            PolicyArg::Reset => ChainChangePolicy::Reset,
        }
    }
}
