use log::error;
use rpg_common::TokenAmount;
use sqlx::SqliteConnection;

use crate::{db_types::InventoryRecord, traits::InventoryError};

/// Number of optimistic update attempts before giving up on a contended row.
const MAX_CAS_ATTEMPTS: usize = 5;

/// Outcome of a reservation attempt.
#[derive(Debug, Clone)]
pub enum ReserveResult {
    Reserved(InventoryRecord),
    Insufficient { available: TokenAmount },
}

pub async fn fetch(
    chain: &str,
    symbol: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<InventoryRecord>, sqlx::Error> {
    let record = sqlx::query_as("SELECT * FROM inventory WHERE chain = $1 AND symbol = $2")
        .bind(chain)
        .bind(symbol)
        .fetch_optional(conn)
        .await?;
    Ok(record)
}

pub async fn ensure_row(chain: &str, symbol: &str, conn: &mut SqliteConnection) -> Result<(), InventoryError> {
    sqlx::query("INSERT INTO inventory (chain, symbol) VALUES ($1, $2) ON CONFLICT (chain, symbol) DO NOTHING")
        .bind(chain)
        .bind(symbol)
        .execute(conn)
        .await?;
    Ok(())
}

/// Reserve `amount` under the no-oversell predicate `balance - reserved >= amount`.
///
/// Token amounts are stored as exact decimal strings, so the arithmetic runs in Rust and the write is guarded with
/// a compare-and-swap on the previous `reserved` value. SQLite's single-writer transactions make the loop converge
/// immediately in practice; the guard keeps the function correct on any backend.
pub async fn reserve(
    chain: &str,
    symbol: &str,
    amount: TokenAmount,
    conn: &mut SqliteConnection,
) -> Result<ReserveResult, InventoryError> {
    for _ in 0..MAX_CAS_ATTEMPTS {
        let record = fetch(chain, symbol, &mut *conn)
            .await?
            .ok_or_else(|| InventoryError::NotFound { chain: chain.into(), symbol: symbol.into() })?;
        let available = record.available();
        if amount > available {
            return Ok(ReserveResult::Insufficient { available });
        }
        let new_reserved = record.reserved + amount;
        let updated = sqlx::query(
            "UPDATE inventory SET reserved = $1, updated_at = CURRENT_TIMESTAMP WHERE chain = $2 AND symbol = $3 \
             AND reserved = $4",
        )
        .bind(new_reserved)
        .bind(chain)
        .bind(symbol)
        .bind(record.reserved)
        .execute(&mut *conn)
        .await?;
        if updated.rows_affected() == 1 {
            return Ok(ReserveResult::Reserved(InventoryRecord { reserved: new_reserved, ..record }));
        }
    }
    Err(InventoryError::DatabaseError(format!("Reservation for {symbol} on {chain} kept losing the row race")))
}

/// `reserved -= min(amount, reserved)`. The subtraction can never push the field negative; if a negative value is
/// observed anyway, it is reset to zero and reported loudly.
pub async fn release(
    chain: &str,
    symbol: &str,
    amount: TokenAmount,
    conn: &mut SqliteConnection,
) -> Result<(), InventoryError> {
    for _ in 0..MAX_CAS_ATTEMPTS {
        let record = fetch(chain, symbol, &mut *conn)
            .await?
            .ok_or_else(|| InventoryError::NotFound { chain: chain.into(), symbol: symbol.into() })?;
        let new_reserved = if record.reserved.is_negative() {
            error!(
                "🗃️ INVARIANT VIOLATION: reserved inventory of {symbol} on {chain} is negative ({}). Resetting to 0.",
                record.reserved
            );
            TokenAmount::zero()
        } else {
            record.reserved - amount.min(record.reserved)
        };
        let updated = sqlx::query(
            "UPDATE inventory SET reserved = $1, updated_at = CURRENT_TIMESTAMP WHERE chain = $2 AND symbol = $3 \
             AND reserved = $4",
        )
        .bind(new_reserved)
        .bind(chain)
        .bind(symbol)
        .bind(record.reserved)
        .execute(&mut *conn)
        .await?;
        if updated.rows_affected() == 1 {
            return Ok(());
        }
    }
    Err(InventoryError::DatabaseError(format!("Release for {symbol} on {chain} kept losing the row race")))
}

/// Decrement both `balance` and `reserved` by `amount`. Called after a confirmed send, so a negative post-state is
/// reported but never rolled back; the funds have already moved.
pub async fn deduct(
    chain: &str,
    symbol: &str,
    amount: TokenAmount,
    conn: &mut SqliteConnection,
) -> Result<(), InventoryError> {
    for _ in 0..MAX_CAS_ATTEMPTS {
        let record = fetch(chain, symbol, &mut *conn)
            .await?
            .ok_or_else(|| InventoryError::NotFound { chain: chain.into(), symbol: symbol.into() })?;
        let new_balance = record.balance - amount;
        let new_reserved = record.reserved - amount;
        if new_balance.is_negative() || new_reserved.is_negative() {
            error!(
                "🗃️ INVARIANT VIOLATION: deducting {amount} of {symbol} on {chain} leaves balance={new_balance}, \
                 reserved={new_reserved}. Funds are already sent; leaving the ledger negative for reconciliation."
            );
        }
        let updated = sqlx::query(
            "UPDATE inventory SET balance = $1, reserved = $2, updated_at = CURRENT_TIMESTAMP WHERE chain = $3 AND \
             symbol = $4 AND reserved = $5",
        )
        .bind(new_balance)
        .bind(new_reserved)
        .bind(chain)
        .bind(symbol)
        .bind(record.reserved)
        .execute(&mut *conn)
        .await?;
        if updated.rows_affected() == 1 {
            return Ok(());
        }
    }
    Err(InventoryError::DatabaseError(format!("Deduct for {symbol} on {chain} kept losing the row race")))
}

/// Overwrite `balance` with the synced on-chain value. `reserved` is untouched.
pub async fn overwrite_balance(
    chain: &str,
    symbol: &str,
    balance: TokenAmount,
    conn: &mut SqliteConnection,
) -> Result<(), InventoryError> {
    let updated = sqlx::query(
        "UPDATE inventory SET balance = $1, updated_at = CURRENT_TIMESTAMP WHERE chain = $2 AND symbol = $3",
    )
    .bind(balance)
    .bind(chain)
    .bind(symbol)
    .execute(conn)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(InventoryError::NotFound { chain: chain.into(), symbol: symbol.into() });
    }
    Ok(())
}
