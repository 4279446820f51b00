//! Row seeding for integration tests. Catalog mutation is admin-tooling territory in production, so tests write
//! these rows directly.
use chrono::{Duration, Utc};
use rpg_common::Idr;

use crate::{
    db_types::{NewUser, NewVoucher, User, Voucher},
    traits::{InventoryManagement, ReferralManagement, VoucherManagement},
    SqliteDatabase,
};

pub async fn seed_chain(db: &SqliteDatabase, slug: &str, chain_id: i64) {
    sqlx::query(
        "INSERT INTO chains (slug, chain_type, rpc_url, chain_id, encrypted_key, confirmations) VALUES ($1, 'Evm', \
         'http://localhost:8545', $2, 'deadbeef:deadbeef', 3)",
    )
    .bind(slug)
    .bind(chain_id)
    .execute(db.pool())
    .await
    .expect("Error seeding chain");
}

pub async fn seed_native_token(db: &SqliteDatabase, chain: &str, symbol: &str, markup_percent: f64) {
    sqlx::query(
        "INSERT INTO tokens (chain, symbol, is_native, decimals, markup_percent) VALUES ($1, $2, 1, 18, $3)",
    )
    .bind(chain)
    .bind(symbol)
    .bind(markup_percent)
    .execute(db.pool())
    .await
    .expect("Error seeding token");
}

pub async fn seed_inventory(db: &SqliteDatabase, chain: &str, symbol: &str, balance: &str) {
    db.ensure_inventory_row(chain, symbol).await.expect("Error creating inventory row");
    db.sync_inventory_balance(chain, symbol, balance.parse().expect("Bad balance literal"))
        .await
        .expect("Error setting inventory balance");
}

pub async fn seed_user(db: &SqliteDatabase) -> User {
    db.create_user(NewUser::default()).await.expect("Error seeding user")
}

pub async fn seed_user_with_chat(db: &SqliteDatabase, chat_id: &str) -> User {
    db.create_user(NewUser { chat_id: Some(chat_id.to_string()), ..NewUser::default() })
        .await
        .expect("Error seeding user")
}

pub async fn seed_referred_user(db: &SqliteDatabase, referrer: &User) -> User {
    db.create_user(NewUser { referral_code_used: Some(referrer.referral_code.clone()), ..NewUser::default() })
        .await
        .expect("Error seeding referred user")
}

pub async fn seed_public_voucher(
    db: &SqliteDatabase,
    code: &str,
    value: i64,
    min_amount: i64,
    max_usage: i64,
) -> Voucher {
    db.create_voucher(NewVoucher {
        code: code.to_string(),
        owner_user_id: None,
        value: Idr::from(value),
        min_amount: Idr::from(min_amount),
        max_usage,
        expires_at: Utc::now() + Duration::days(7),
    })
    .await
    .expect("Error seeding voucher")
}
