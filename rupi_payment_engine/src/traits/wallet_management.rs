use async_trait::async_trait;
use rpg_common::TokenAmount;
use thiserror::Error;

use crate::db_types::ChainType;

/// A client for one blockchain. Implementations hold the decrypted signing key in memory and talk to the chain's
/// RPC endpoint.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// The hot wallet's own address on this chain.
    fn wallet_address(&self) -> &str;

    /// Native balance of an address, in whole tokens.
    async fn native_balance(&self, address: &str) -> Result<TokenAmount, WalletError>;

    /// Estimated network fee for a native transfer, in whole tokens.
    async fn estimate_fee(&self) -> Result<TokenAmount, WalletError>;

    /// Broadcast a native transfer and await the configured confirmations. Returns the transaction hash.
    ///
    /// When the transaction was broadcast but the confirmation wait failed, this returns
    /// [`WalletError::TxBroadcasted`] carrying the hash, the distinguished "money may be in flight" signal. Any
    /// other submission error propagates unchanged.
    async fn send_native(&self, to: &str, amount: TokenAmount) -> Result<String, WalletError>;
}

/// What the payout executor needs from the hot wallet layer. `HotWalletManager` implements this over its per-chain
/// clients and the chain mutex; tests substitute mocks.
#[async_trait]
pub trait PayoutWallet: Send + Sync {
    /// Transfer `amount` of the chain's native asset to `to`, serialised per chain: only one send may execute per
    /// chain at any moment.
    async fn send_native(&self, chain: &str, to: &str, amount: TokenAmount) -> Result<String, WalletError>;
}

#[derive(Debug, Clone, Error)]
pub enum WalletError {
    #[error("Transaction {tx_hash} was broadcast but confirmation was not observed")]
    TxBroadcasted { tx_hash: String },
    #[error("Could not acquire the chain lock for {0} within the retry budget")]
    LockAcquisition(String),
    #[error("No hot wallet is configured for chain '{0}'")]
    UnknownChain(String),
    #[error("Sending is not supported for {0} chains")]
    UnsupportedChainType(ChainType),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("Could not reach the RPC endpoint: {0}")]
    Transport(String),
    #[error("Signing key problem: {0}")]
    Key(String),
    #[error("'{0}' is not a valid address")]
    InvalidAddress(String),
    #[error("Amount {0} cannot be represented in base units")]
    AmountOutOfRange(TokenAmount),
}
