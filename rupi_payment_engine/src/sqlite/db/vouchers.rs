use chrono::Utc;
use log::debug;
use rpg_common::Idr;
use sqlx::SqliteConnection;

use crate::{
    db_types::{NewVoucher, OrderStatusType, Voucher},
    sqlite::db::orders,
    traits::VoucherError,
};

pub async fn fetch_by_code(code: &str, conn: &mut SqliteConnection) -> Result<Option<Voucher>, sqlx::Error> {
    let voucher = sqlx::query_as("SELECT * FROM vouchers WHERE code = $1").bind(code).fetch_optional(conn).await?;
    Ok(voucher)
}

pub async fn fetch_by_id(id: i64, conn: &mut SqliteConnection) -> Result<Option<Voucher>, sqlx::Error> {
    let voucher = sqlx::query_as("SELECT * FROM vouchers WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(voucher)
}

/// Every redemption validation, without consuming quota.
///
/// For public multi-use vouchers the per-user rules also apply: a user who already redeemed the code on a
/// successful order, or who has an active order holding it, cannot take another slot.
pub async fn validate(
    code: &str,
    user_id: i64,
    order_amount: Idr,
    conn: &mut SqliteConnection,
) -> Result<Voucher, VoucherError> {
    let voucher = fetch_by_code(code, &mut *conn).await?.ok_or(VoucherError::NotFound)?;
    if !voucher.active {
        return Err(VoucherError::Inactive);
    }
    if voucher.expires_at < Utc::now() {
        return Err(VoucherError::Expired);
    }
    if let Some(owner) = voucher.owner_user_id {
        if owner != user_id {
            return Err(VoucherError::NotOwner);
        }
    }
    if order_amount < voucher.min_amount {
        return Err(VoucherError::BelowMinimum(voucher.min_amount));
    }
    if voucher.owner_user_id.is_none() && voucher.max_usage > 1 {
        let redeemed =
            orders::count_orders_with_voucher(user_id, voucher.id, &[OrderStatusType::Success], &mut *conn)
                .await
                .map_err(|e| VoucherError::DatabaseError(e.to_string()))?;
        if redeemed > 0 {
            return Err(VoucherError::AlreadyRedeemed);
        }
        let active = orders::count_orders_with_voucher(
            user_id,
            voucher.id,
            &[OrderStatusType::Pending, OrderStatusType::Paid, OrderStatusType::Processing],
            &mut *conn,
        )
        .await
        .map_err(|e| VoucherError::DatabaseError(e.to_string()))?;
        if active > 0 {
            return Err(VoucherError::InUse);
        }
    }
    Ok(voucher)
}

/// The atomic quota increment: `usage_count += 1` guarded on `usage_count < max_usage`. A zero-row update means the
/// quota ran out under this caller's feet.
pub async fn reserve_usage(voucher_id: i64, conn: &mut SqliteConnection) -> Result<bool, VoucherError> {
    let updated =
        sqlx::query("UPDATE vouchers SET usage_count = usage_count + 1 WHERE id = $1 AND usage_count < max_usage")
            .bind(voucher_id)
            .execute(conn)
            .await?;
    Ok(updated.rows_affected() == 1)
}

/// Atomic decrement floored by the predicate `usage_count > 0`. A zero-row update is deliberately ignored so a
/// double release can never underflow the counter.
pub async fn release_usage(voucher_id: i64, conn: &mut SqliteConnection) -> Result<(), VoucherError> {
    let updated =
        sqlx::query("UPDATE vouchers SET usage_count = usage_count - 1 WHERE id = $1 AND usage_count > 0")
            .bind(voucher_id)
            .execute(conn)
            .await?;
    if updated.rows_affected() == 0 {
        debug!("🎟️ Release of voucher {voucher_id} was a no-op (usage already 0)");
    }
    Ok(())
}

pub async fn insert(voucher: &NewVoucher, conn: &mut SqliteConnection) -> Result<Voucher, VoucherError> {
    let inserted = sqlx::query_as(
        r#"
            INSERT INTO vouchers (code, owner_user_id, value, min_amount, max_usage, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *;
        "#,
    )
    .bind(&voucher.code)
    .bind(voucher.owner_user_id)
    .bind(voucher.value)
    .bind(voucher.min_amount)
    .bind(voucher.max_usage)
    .bind(voucher.expires_at)
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => VoucherError::DuplicateCode,
        other => VoucherError::DatabaseError(other.to_string()),
    })?;
    Ok(inserted)
}

/// Deactivate vouchers past their expiry. Returns the number of rows changed.
pub async fn expire(conn: &mut SqliteConnection) -> Result<u64, VoucherError> {
    let updated = sqlx::query("UPDATE vouchers SET active = 0 WHERE active = 1 AND expires_at < CURRENT_TIMESTAMP")
        .execute(conn)
        .await?;
    Ok(updated.rows_affected())
}
