//! `SqliteDatabase` is a concrete implementation of a Rupi Payment Engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the traits defined in the [`traits`] module.
use std::fmt::Debug;

use chrono::{DateTime, Duration, Utc};
use log::*;
use rpg_common::{Idr, TokenAmount};
use sqlx::SqlitePool;

use super::db::{audit, catalog, db_url, inventory, new_pool, orders, referrals, settings, users, vouchers};
use crate::{
    db_types::{
        Chain, ExchangeRate, InventoryRecord, NewOrder, NewUser, NewVoucher, Order, OrderId, OrderStatusType,
        PaymentAttachment, Referral, Token, User, Voucher,
    },
    engine_api::order_objects::OrderQueryFilter,
    traits::{
        CancelOutcome, CatalogError, CatalogManagement, ExchangeRateError, ExchangeRates, InventoryError,
        InventoryManagement, PaymentGatewayDatabase, PaymentGatewayError, PayoutClaim, ReferralError,
        ReferralManagement, SettingsManagement, VoucherError, VoucherManagement,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object using the URL from the environment.
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl PaymentGatewayDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn create_order(&self, order: NewOrder) -> Result<Order, PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        if let Some(pending) = orders::fetch_pending_order_for_user(order.user_id, &mut tx).await? {
            debug!("🗃️ User {} already has pending order {}", order.user_id, pending.order_id);
            return Err(PaymentGatewayError::PendingOrderExists(Box::new(pending)));
        }
        match inventory::reserve(&order.chain, &order.symbol, order.amount_token, &mut tx).await? {
            inventory::ReserveResult::Reserved(_) => {},
            inventory::ReserveResult::Insufficient { available } => {
                return Err(InventoryError::Insufficient {
                    chain: order.chain.clone(),
                    symbol: order.symbol.clone(),
                    wanted: order.amount_token,
                    available,
                }
                .into());
            },
        }
        let (voucher_id, payable) = match order.voucher_code.as_deref() {
            Some(code) => {
                let voucher = vouchers::validate(code, order.user_id, order.amount_idr, &mut tx).await?;
                if !vouchers::reserve_usage(voucher.id, &mut tx).await? {
                    // The quota ran out between validation and the increment. Rolling back also releases the
                    // inventory reservation taken above.
                    return Err(VoucherError::QuotaExceeded.into());
                }
                (Some(voucher.id), voucher.discounted(order.amount_idr))
            },
            None => (None, order.amount_idr),
        };
        let order_id = OrderId::random();
        let inserted = orders::insert_order(&order, &order_id, payable, voucher_id, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Order {} created for user {} ({} {} on {})", inserted.order_id, inserted.user_id,
            inserted.amount_token, inserted.symbol, inserted.chain);
        Ok(inserted)
    }

    async fn attach_payment(
        &self,
        order_id: &OrderId,
        payment: PaymentAttachment,
    ) -> Result<Order, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::attach_payment(order_id, &payment, &mut conn).await?;
        match order {
            Some(order) => Ok(order),
            None => {
                // Distinguish "gone" from "already advanced" for the caller's error message.
                match orders::fetch_order_by_order_id(order_id, &mut conn).await? {
                    Some(_) => Err(PaymentGatewayError::OrderNotPending(order_id.clone())),
                    None => Err(PaymentGatewayError::OrderNotFound(order_id.clone())),
                }
            },
        }
    }

    async fn mark_paid(&self, order_id: &OrderId) -> Result<Option<Order>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::mark_paid(order_id, &mut conn).await?;
        if let Some(o) = &order {
            debug!("🗃️ Order {} marked as paid", o.order_id);
        }
        Ok(order)
    }

    async fn claim_for_payout(&self, order_id: &OrderId) -> Result<PayoutClaim, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        if let Some(order) = orders::claim_for_payout(order_id, &mut conn).await? {
            debug!("🗃️ Payout claim on {} won", order.order_id);
            return Ok(PayoutClaim::Claimed(order));
        }
        let order = orders::fetch_order_by_order_id(order_id, &mut conn)
            .await?
            .ok_or_else(|| PaymentGatewayError::OrderNotFound(order_id.clone()))?;
        let claim = match order.status {
            OrderStatusType::Success => PayoutClaim::AlreadySuccess(order),
            _ if order.tx_hash.is_some() => PayoutClaim::Recoverable(order),
            OrderStatusType::Processing => PayoutClaim::InProgress(order),
            _ => PayoutClaim::Ineligible(order),
        };
        Ok(claim)
    }

    async fn steal_stale_claim(
        &self,
        order_id: &OrderId,
        seen_updated_at: DateTime<Utc>,
    ) -> Result<Option<Order>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::steal_stale_claim(order_id, seen_updated_at, &mut conn).await?;
        if order.is_some() {
            warn!("🗃️ Stale payout claim on {order_id} stolen from a dead worker");
            audit::write("payout", Some(order_id.as_str()), "Stale Processing claim stolen", &mut conn).await;
        }
        Ok(order)
    }

    async fn record_broadcast(&self, order_id: &OrderId, tx_hash: &str) -> Result<(), PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        orders::record_broadcast(order_id, tx_hash, &mut conn).await
    }

    async fn finalize_success(&self, order_id: &OrderId, tx_hash: &str) -> Result<Order, PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        let Some(order) = orders::finalize_success(order_id, tx_hash, &mut tx).await? else {
            // Zero rows: either a concurrent worker finalised first (fine), or the order is in a state that should
            // be impossible while we hold the claim.
            let current = orders::fetch_order_by_order_id(order_id, &mut tx)
                .await?
                .ok_or_else(|| PaymentGatewayError::OrderNotFound(order_id.clone()))?;
            if current.status == OrderStatusType::Success {
                return Ok(current);
            }
            return Err(PaymentGatewayError::DatabaseError(format!(
                "Order {order_id} was {} during finalisation; expected Processing",
                current.status
            )));
        };
        inventory::deduct(&order.chain, &order.symbol, order.amount_token, &mut tx).await?;
        audit::write("payout", Some(order_id.as_str()), &format!("Payout confirmed in tx {tx_hash}"), &mut tx).await;
        tx.commit().await?;
        info!("🗃️ Order {} finalised with tx {tx_hash}", order.order_id);
        Ok(order)
    }

    async fn fail_order(&self, order_id: &OrderId) -> Result<Order, PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        let Some(order) =
            orders::update_status_conditional(order_id, &[OrderStatusType::Processing], OrderStatusType::Failed, &mut tx)
                .await?
        else {
            return Err(PaymentGatewayError::DatabaseError(format!(
                "Order {order_id} was not Processing when recording a safe payout failure"
            )));
        };
        inventory::release(&order.chain, &order.symbol, order.amount_token, &mut tx).await?;
        if let Some(voucher_id) = order.voucher_id {
            vouchers::release_usage(voucher_id, &mut tx).await?;
        }
        audit::write("payout", Some(order_id.as_str()), "Safe payout failure; reservations refunded", &mut tx).await;
        tx.commit().await?;
        warn!("🗃️ Order {} marked as failed and refunded", order.order_id);
        Ok(order)
    }

    async fn cancel_order(&self, order_id: &OrderId) -> Result<CancelOutcome, PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        match orders::update_status_conditional(order_id, &[OrderStatusType::Pending], OrderStatusType::Cancelled, &mut tx)
            .await?
        {
            Some(order) => {
                inventory::release(&order.chain, &order.symbol, order.amount_token, &mut tx).await?;
                if let Some(voucher_id) = order.voucher_id {
                    vouchers::release_usage(voucher_id, &mut tx).await?;
                }
                tx.commit().await?;
                debug!("🗃️ Order {} cancelled and reservations released", order.order_id);
                Ok(CancelOutcome::Cancelled(order))
            },
            None => {
                let order = orders::fetch_order_by_order_id(order_id, &mut tx)
                    .await?
                    .ok_or_else(|| PaymentGatewayError::OrderNotFound(order_id.clone()))?;
                match order.status {
                    OrderStatusType::Paid | OrderStatusType::Processing | OrderStatusType::Success => {
                        Err(PaymentGatewayError::CancelForbidden { order_id: order_id.clone(), status: order.status })
                    },
                    _ => Ok(CancelOutcome::AlreadyInactive(order)),
                }
            },
        }
    }

    async fn expire_order(&self, order_id: &OrderId) -> Result<Option<Order>, PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        let Some(order) =
            orders::update_status_conditional(order_id, &[OrderStatusType::Pending], OrderStatusType::Expired, &mut tx)
                .await?
        else {
            return Ok(None);
        };
        inventory::release(&order.chain, &order.symbol, order.amount_token, &mut tx).await?;
        if let Some(voucher_id) = order.voucher_id {
            vouchers::release_usage(voucher_id, &mut tx).await?;
        }
        tx.commit().await?;
        debug!("🗃️ Order {} expired and reservations released", order.order_id);
        Ok(Some(order))
    }

    async fn fetch_order(&self, order_id: &OrderId) -> Result<Option<Order>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order_by_order_id(order_id, &mut conn).await?;
        Ok(order)
    }

    async fn fetch_order_by_midtrans_id(&self, midtrans_id: &str) -> Result<Option<Order>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order_by_midtrans_id(midtrans_id, &mut conn).await?;
        Ok(order)
    }

    async fn fetch_pending_order_for_user(&self, user_id: i64) -> Result<Option<Order>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_pending_order_for_user(user_id, &mut conn).await?;
        Ok(order)
    }

    async fn fetch_expiry_candidates(&self, age: Duration) -> Result<Vec<Order>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_expiry_candidates(age, &mut conn).await
    }

    async fn fetch_stalled_paid_orders(&self, age: Duration) -> Result<Vec<Order>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_stalled_paid_orders(age, &mut conn).await
    }

    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let result = orders::search_orders(query, &mut conn).await?;
        Ok(result)
    }

    async fn count_voucher_usage(
        &self,
        user_id: i64,
        voucher_id: i64,
        statuses: &[OrderStatusType],
    ) -> Result<i64, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let count = orders::count_orders_with_voucher(user_id, voucher_id, statuses, &mut conn).await?;
        Ok(count)
    }

    async fn close(&mut self) -> Result<(), PaymentGatewayError> {
        self.pool.close().await;
        Ok(())
    }
}

impl InventoryManagement for SqliteDatabase {
    async fn fetch_inventory(&self, chain: &str, symbol: &str) -> Result<Option<InventoryRecord>, InventoryError> {
        let mut conn = self.pool.acquire().await?;
        let record = inventory::fetch(chain, symbol, &mut conn).await?;
        Ok(record)
    }

    async fn ensure_inventory_row(&self, chain: &str, symbol: &str) -> Result<(), InventoryError> {
        let mut conn = self.pool.acquire().await?;
        inventory::ensure_row(chain, symbol, &mut conn).await
    }

    async fn reserve_inventory(
        &self,
        chain: &str,
        symbol: &str,
        amount: TokenAmount,
    ) -> Result<bool, InventoryError> {
        let mut tx = self.pool.begin().await?;
        let outcome = inventory::reserve(chain, symbol, amount, &mut tx).await?;
        tx.commit().await.map_err(|e| InventoryError::DatabaseError(e.to_string()))?;
        Ok(matches!(outcome, inventory::ReserveResult::Reserved(_)))
    }

    async fn release_inventory(&self, chain: &str, symbol: &str, amount: TokenAmount) -> Result<(), InventoryError> {
        let mut conn = self.pool.acquire().await?;
        inventory::release(chain, symbol, amount, &mut conn).await
    }

    async fn deduct_inventory(&self, chain: &str, symbol: &str, amount: TokenAmount) -> Result<(), InventoryError> {
        let mut conn = self.pool.acquire().await?;
        inventory::deduct(chain, symbol, amount, &mut conn).await
    }

    async fn sync_inventory_balance(
        &self,
        chain: &str,
        symbol: &str,
        balance: TokenAmount,
    ) -> Result<(), InventoryError> {
        let mut conn = self.pool.acquire().await?;
        inventory::overwrite_balance(chain, symbol, balance, &mut conn).await
    }
}

impl VoucherManagement for SqliteDatabase {
    async fn fetch_voucher(&self, code: &str) -> Result<Option<Voucher>, VoucherError> {
        let mut conn = self.pool.acquire().await?;
        let voucher = vouchers::fetch_by_code(code, &mut conn).await?;
        Ok(voucher)
    }

    async fn peek_voucher(&self, code: &str, user_id: i64, order_amount: Idr) -> Result<Voucher, VoucherError> {
        let mut conn = self.pool.acquire().await?;
        vouchers::validate(code, user_id, order_amount, &mut conn).await
    }

    async fn release_voucher(&self, voucher_id: i64) -> Result<(), VoucherError> {
        let mut conn = self.pool.acquire().await?;
        vouchers::release_usage(voucher_id, &mut conn).await
    }

    async fn create_voucher(&self, voucher: NewVoucher) -> Result<Voucher, VoucherError> {
        let mut conn = self.pool.acquire().await?;
        vouchers::insert(&voucher, &mut conn).await
    }

    async fn expire_vouchers(&self) -> Result<u64, VoucherError> {
        let mut conn = self.pool.acquire().await?;
        vouchers::expire(&mut conn).await
    }
}

impl ReferralManagement for SqliteDatabase {
    async fn create_user(&self, user: NewUser) -> Result<User, ReferralError> {
        let mut tx = self.pool.begin().await?;
        let referrer = match user.referral_code_used.as_deref() {
            Some(code) => users::fetch_by_referral_code(code, &mut tx).await?,
            None => None,
        };
        let code = users::random_referral_code();
        let created =
            users::insert(user.email.as_deref(), user.chat_id.as_deref(), &code, referrer.as_ref().map(|u| u.id), &mut tx)
                .await?;
        if let Some(referrer) = referrer {
            referrals::insert(referrer.id, created.id, &mut tx).await?;
            debug!("🗃️ Referral recorded: {} referred user {}", referrer.id, created.id);
        }
        tx.commit().await?;
        Ok(created)
    }

    async fn fetch_user(&self, user_id: i64) -> Result<Option<User>, ReferralError> {
        let mut conn = self.pool.acquire().await?;
        let user = users::fetch_by_id(user_id, &mut conn).await?;
        Ok(user)
    }

    async fn fetch_user_by_chat_id(&self, chat_id: &str) -> Result<Option<User>, ReferralError> {
        let mut conn = self.pool.acquire().await?;
        let user = users::fetch_by_chat_id(chat_id, &mut conn).await?;
        Ok(user)
    }

    async fn fetch_referral_for_referee(&self, referee_id: i64) -> Result<Option<Referral>, ReferralError> {
        let mut conn = self.pool.acquire().await?;
        let referral = referrals::fetch_for_referee(referee_id, &mut conn).await?;
        Ok(referral)
    }

    async fn count_success_orders(&self, user_id: i64) -> Result<i64, ReferralError> {
        let mut conn = self.pool.acquire().await?;
        let count = orders::count_success_orders(user_id, &mut conn).await?;
        Ok(count)
    }

    async fn mark_referral_valid(&self, referral_id: i64) -> Result<bool, ReferralError> {
        let mut conn = self.pool.acquire().await?;
        referrals::mark_valid(referral_id, &mut conn).await
    }

    async fn claim_referral_reward(&self, referral_id: i64) -> Result<bool, ReferralError> {
        let mut conn = self.pool.acquire().await?;
        referrals::claim_reward(referral_id, &mut conn).await
    }

    async fn count_valid_referrals(&self, referrer_id: i64) -> Result<i64, ReferralError> {
        let mut conn = self.pool.acquire().await?;
        let count = referrals::count_valid_for_referrer(referrer_id, &mut conn).await?;
        Ok(count)
    }

    async fn fetch_unvalidated_referrals(&self, limit: i64) -> Result<Vec<Referral>, ReferralError> {
        let mut conn = self.pool.acquire().await?;
        let result = referrals::fetch_unvalidated(limit, &mut conn).await?;
        Ok(result)
    }
}

impl CatalogManagement for SqliteDatabase {
    async fn fetch_active_chains(&self) -> Result<Vec<Chain>, CatalogError> {
        let mut conn = self.pool.acquire().await?;
        let chains = catalog::fetch_active_chains(&mut conn).await?;
        Ok(chains)
    }

    async fn fetch_chain(&self, slug: &str) -> Result<Option<Chain>, CatalogError> {
        let mut conn = self.pool.acquire().await?;
        let chain = catalog::fetch_chain(slug, &mut conn).await?;
        Ok(chain)
    }

    async fn fetch_native_token(&self, chain_slug: &str) -> Result<Option<Token>, CatalogError> {
        let mut conn = self.pool.acquire().await?;
        let token = catalog::fetch_native_token(chain_slug, &mut conn).await?;
        Ok(token)
    }

    async fn fetch_tokens_for_chain(&self, chain_slug: &str) -> Result<Vec<Token>, CatalogError> {
        let mut conn = self.pool.acquire().await?;
        let tokens = catalog::fetch_tokens_for_chain(chain_slug, &mut conn).await?;
        Ok(tokens)
    }
}

impl ExchangeRates for SqliteDatabase {
    async fn fetch_last_rate(&self, base_currency: &str) -> Result<ExchangeRate, ExchangeRateError> {
        let mut conn = self.pool.acquire().await?;
        settings::fetch_last_rate(base_currency, &mut conn).await
    }

    /// Save the exchange rate for the given currency to the backend storage.
    ///
    /// The `updated_at` field of the exchange rate is ignored. The backend will set this field to the current time.
    async fn set_exchange_rate(&self, new_rate: &ExchangeRate) -> Result<(), ExchangeRateError> {
        let mut conn = self.pool.acquire().await?;
        settings::set_exchange_rate(new_rate, &mut conn).await
    }
}

impl SettingsManagement for SqliteDatabase {
    async fn fetch_setting(&self, key: &str) -> Result<Option<String>, ExchangeRateError> {
        let mut conn = self.pool.acquire().await?;
        settings::fetch_setting(key, &mut conn).await
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<(), ExchangeRateError> {
        let mut conn = self.pool.acquire().await?;
        settings::set_setting(key, value, &mut conn).await
    }
}
