use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::{
    db_types::{NewOrder, Order, OrderId, OrderStatusType, PaymentAttachment},
    engine_api::order_objects::OrderQueryFilter,
    traits::{CancelOutcome, InventoryError, PayoutClaim, VoucherError},
};

/// This trait defines the highest level of behaviour for backends supporting the Rupi Payment Engine: the order
/// state machine and its atomic transitions.
///
/// Every transition is a conditional update matching the prior status, so at most one caller can effect any given
/// transition. Reservation coupling (inventory, voucher) happens inside the same database transaction as the order
/// row change, which is what makes rollback safe on any failure.
#[allow(async_fn_in_trait)]
pub trait PaymentGatewayDatabase: Clone + Send + Sync {
    /// The URL of the database.
    fn url(&self) -> &str;

    /// Creates a new order in a single atomic transaction:
    /// * rejects if the user already has a `Pending` order,
    /// * reserves inventory for the token amount,
    /// * validates and reserves the voucher, when one is supplied,
    /// * computes the post-discount payable amount,
    /// * inserts the order in `Pending`.
    ///
    /// Any failure rolls the whole transaction back, releasing both reservations.
    async fn create_order(&self, order: NewOrder) -> Result<Order, PaymentGatewayError>;

    /// Attaches a freshly created payment instrument to a `Pending` order. The previous gateway id, if any, is
    /// overwritten, which intentionally orphans webhooks for the old instrument.
    async fn attach_payment(&self, order_id: &OrderId, payment: PaymentAttachment)
        -> Result<Order, PaymentGatewayError>;

    /// The conditional `Pending -> Paid` transition, setting `paid_at`. Returns `None` when the order had already
    /// left `Pending`; the caller must treat that as "someone else processed this" and do nothing.
    async fn mark_paid(&self, order_id: &OrderId) -> Result<Option<Order>, PaymentGatewayError>;

    /// The payout claim: `{status=Paid, tx_hash IS NULL} -> Processing`, bumping `updated_at`. See [`PayoutClaim`]
    /// for the non-winning shapes.
    async fn claim_for_payout(&self, order_id: &OrderId) -> Result<PayoutClaim, PaymentGatewayError>;

    /// Steal a stale `Processing` claim by a conditional update guarded on the exact `updated_at` the caller
    /// observed. Returns the re-claimed order, or `None` when another worker won the steal first.
    async fn steal_stale_claim(
        &self,
        order_id: &OrderId,
        seen_updated_at: DateTime<Utc>,
    ) -> Result<Option<Order>, PaymentGatewayError>;

    /// Record the broadcast hash the moment it is known, before finalisation. A worker crash after this point
    /// leaves a `Processing` order with a non-null `tx_hash`, which routes all later consumers through recovery
    /// instead of a second send.
    async fn record_broadcast(&self, order_id: &OrderId, tx_hash: &str) -> Result<(), PaymentGatewayError>;

    /// Finalise a payout in one transaction: set `Success`, `tx_hash`, `completed_at` and deduct inventory
    /// (`balance` and `reserved` both drop by the order's token amount).
    async fn finalize_success(&self, order_id: &OrderId, tx_hash: &str) -> Result<Order, PaymentGatewayError>;

    /// Record a safe payout failure in one transaction: `Processing -> Failed` and release the inventory and
    /// voucher reservations. Only called when it is certain no funds left the wallet.
    async fn fail_order(&self, order_id: &OrderId) -> Result<Order, PaymentGatewayError>;

    /// The conditional `Pending -> Cancelled` transition followed by reservation release in the same transaction.
    /// Cancelling an order that has already been paid for (or is being paid out) is a user-visible error.
    async fn cancel_order(&self, order_id: &OrderId) -> Result<CancelOutcome, PaymentGatewayError>;

    /// The conditional `Pending -> Expired` transition followed by reservation release in the same transaction.
    /// Returns `None` when the order had already left `Pending`.
    async fn expire_order(&self, order_id: &OrderId) -> Result<Option<Order>, PaymentGatewayError>;

    async fn fetch_order(&self, order_id: &OrderId) -> Result<Option<Order>, PaymentGatewayError>;

    /// Locates an order by the gateway-side id attached at payment creation. Webhooks for regenerated payments miss
    /// here by design.
    async fn fetch_order_by_midtrans_id(&self, midtrans_id: &str) -> Result<Option<Order>, PaymentGatewayError>;

    async fn fetch_pending_order_for_user(&self, user_id: i64) -> Result<Option<Order>, PaymentGatewayError>;

    /// `Pending` orders older than `age`, i.e. the candidates for the expiry sweep.
    async fn fetch_expiry_candidates(&self, age: Duration) -> Result<Vec<Order>, PaymentGatewayError>;

    /// `Paid` orders older than `age` with no `tx_hash` and no `Processing` claim, i.e. payouts lost between webhook
    /// and queue. The rescue sweep re-enqueues these.
    async fn fetch_stalled_paid_orders(&self, age: Duration) -> Result<Vec<Order>, PaymentGatewayError>;

    /// Fetches orders according to criteria specified in the `OrderQueryFilter`, ordered by `created_at` ascending.
    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, PaymentGatewayError>;

    /// Counts `Success` orders a user has completed with the given voucher.
    async fn count_voucher_usage(
        &self,
        user_id: i64,
        voucher_id: i64,
        statuses: &[OrderStatusType],
    ) -> Result<i64, PaymentGatewayError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), PaymentGatewayError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum PaymentGatewayError {
    #[error("We have an internal database engine error (configuration/uptime etc.): {0}")]
    DatabaseError(String),
    #[error("The requested order {0} does not exist")]
    OrderNotFound(OrderId),
    #[error("The user already has a pending order {}", .0.order_id)]
    PendingOrderExists(Box<Order>),
    #[error("Order {0} is not awaiting payment")]
    OrderNotPending(OrderId),
    #[error("Order {order_id} cannot be cancelled while it is {status}")]
    CancelForbidden { order_id: OrderId, status: OrderStatusType },
    #[error("Inventory problem: {0}")]
    InventoryError(#[from] InventoryError),
    #[error("Voucher problem: {0}")]
    VoucherError(#[from] VoucherError),
    #[error("There is no token listed for {symbol} on {chain}")]
    UnknownToken { chain: String, symbol: String },
}

impl From<sqlx::Error> for PaymentGatewayError {
    fn from(e: sqlx::Error) -> Self {
        PaymentGatewayError::DatabaseError(e.to_string())
    }
}
