use rpg_common::TokenAmount;
use thiserror::Error;

use crate::db_types::InventoryRecord;

/// Per-(chain, symbol) stock ledger with a strict no-oversell guarantee.
///
/// The invariant `0 <= reserved <= balance` holds at every atomic boundary. Reservation for order creation happens
/// inside the order transaction (see `PaymentGatewayDatabase::create_order`); the operations here are the standalone
/// forms used by workers and admin tooling.
#[allow(async_fn_in_trait)]
pub trait InventoryManagement: Clone + Send + Sync {
    async fn fetch_inventory(&self, chain: &str, symbol: &str) -> Result<Option<InventoryRecord>, InventoryError>;

    /// Creates the row with zero balance if it does not exist yet. Called on chain registration.
    async fn ensure_inventory_row(&self, chain: &str, symbol: &str) -> Result<(), InventoryError>;

    /// Reserve `amount` if `balance - reserved >= amount`. Returns `false` without changing anything when the stock
    /// is insufficient.
    async fn reserve_inventory(&self, chain: &str, symbol: &str, amount: TokenAmount)
        -> Result<bool, InventoryError>;

    /// `reserved -= min(amount, reserved)`. Never drops below zero; an observed negative value is reset to zero and
    /// reported at error level.
    async fn release_inventory(&self, chain: &str, symbol: &str, amount: TokenAmount) -> Result<(), InventoryError>;

    /// Decrement both `balance` and `reserved` by `amount`. A negative post-state is logged loudly but not rolled
    /// back; the funds have already moved on-chain.
    async fn deduct_inventory(&self, chain: &str, symbol: &str, amount: TokenAmount) -> Result<(), InventoryError>;

    /// Overwrite `balance` with the on-chain hot wallet balance. `reserved` is untouched.
    async fn sync_inventory_balance(
        &self,
        chain: &str,
        symbol: &str,
        balance: TokenAmount,
    ) -> Result<(), InventoryError>;
}

#[derive(Debug, Clone, Error)]
pub enum InventoryError {
    #[error("We have an internal database engine error (configuration/uptime etc.): {0}")]
    DatabaseError(String),
    #[error("No inventory row exists for {symbol} on {chain}")]
    NotFound { chain: String, symbol: String },
    #[error("Insufficient stock of {symbol} on {chain}: wanted {wanted}, available {available}")]
    Insufficient { chain: String, symbol: String, wanted: TokenAmount, available: TokenAmount },
}

impl From<sqlx::Error> for InventoryError {
    fn from(e: sqlx::Error) -> Self {
        InventoryError::DatabaseError(e.to_string())
    }
}
