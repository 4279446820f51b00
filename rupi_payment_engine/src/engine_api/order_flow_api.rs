//! The order lifecycle: creation, payment attachment, webhook reconciliation, expiry and, above all, the payout
//! executor.
use std::fmt::Debug;

use chrono::{Duration, Utc};
use log::*;
use rpg_common::Idr;
use thiserror::Error;

use crate::{
    db_types::{NewOrder, Order, OrderId, PaymentAttachment, PaymentMethod},
    events::{
        EventProducers, OrderAnnulledEvent, OrderCompletedEvent, OrderEvent, PayoutStuckEvent,
    },
    helpers::{checksum_address, AddressError},
    traits::{
        CancelOutcome, ChargeRequest, ChargeResponse, ExpirySweepResult, GatewayStatus, PaymentGatewayDatabase,
        PaymentGatewayError, PaymentProvider, PayoutClaim, PayoutWallet, ProviderError, WalletError,
    },
    wallet::send_error,
};

/// Unpaid orders expire after this long (subject to the gateway safety check).
pub const ORDER_PAYMENT_TTL: Duration = Duration::minutes(15);
/// While the gateway still reports `pending`, expiry is deferred until the order is this old.
pub const GATEWAY_PENDING_GRACE: Duration = Duration::minutes(70);
/// A `Processing` claim older than this belongs to a dead worker and may be stolen.
pub const STALE_CLAIM_AGE: Duration = Duration::minutes(10);
/// `Paid` orders with no payout activity for this long get re-enqueued by the sweep.
const STALLED_PAID_AGE: Duration = Duration::minutes(10);
/// Ethereum mainnet sends are uneconomical below this order size.
pub const MIN_ORDER_IDR_ETHEREUM: i64 = 500_000;
const ETHEREUM_SLUG: &str = "ethereum";

const MAX_CLAIM_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum OrderFlowError {
    #[error("{0}")]
    Database(#[from] PaymentGatewayError),
    #[error("{0}")]
    InvalidAddress(#[from] AddressError),
    #[error("Orders on Ethereum must be at least Rp {MIN_ORDER_IDR_ETHEREUM}")]
    BelowChainMinimum,
    #[error("Order amount must be positive")]
    NonPositiveAmount,
    #[error("Payment gateway error: {0}")]
    Provider(#[from] ProviderError),
    #[error("Could not win the payout claim for {0} within the attempt budget")]
    ClaimContention(OrderId),
    #[error("Payout for {order_id} failed ambiguously: {message}. The order is frozen in Processing for recovery.")]
    AmbiguousSendFailure { order_id: OrderId, message: String },
    #[error(
        "Order {order_id} is paid out on-chain in {tx_hash} but could not be finalised: {message}. Manual \
         reconciliation required."
    )]
    FinalizeFailed { order_id: OrderId, tx_hash: String, message: String },
}

/// What one executor invocation did.
#[derive(Debug, Clone)]
pub enum PayoutOutcome {
    /// This worker sent the funds and finalised the order.
    Completed(Order),
    /// A previous worker's broadcast was finalised without sending again.
    Recovered(Order),
    /// The order was already `Success`.
    AlreadyComplete(Order),
    /// The send failed safely; the order is `Failed` and reservations are refunded.
    Failed(Order, String),
    /// Nothing to do: another worker owns the claim, or the order is not in a payable state.
    Skipped(Order),
}

enum ClaimResult {
    Execute(Order),
    Done(PayoutOutcome),
}

/// `OrderFlowApi` is the primary API for the order state machine, from creation through payout.
pub struct OrderFlowApi<B> {
    db: B,
    producers: EventProducers,
}

impl<B> Debug for OrderFlowApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderFlowApi")
    }
}

impl<B> OrderFlowApi<B>
where B: PaymentGatewayDatabase
{
    pub fn new(db: B, producers: EventProducers) -> Self {
        Self { db, producers }
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    /// Create a new order.
    ///
    /// The wallet address is checksum-validated here (a wrong mixed-case checksum is rejected, never corrected).
    /// Everything stateful (the pending-order check, inventory reservation, voucher reservation and the insert)
    /// happens in one database transaction inside the backend.
    pub async fn create_order(&self, order: NewOrder) -> Result<Order, OrderFlowError> {
        if !order.amount_idr.is_positive() || order.amount_token.is_zero() || order.amount_token.is_negative() {
            return Err(OrderFlowError::NonPositiveAmount);
        }
        if order.chain == ETHEREUM_SLUG && order.amount_idr < Idr::from(MIN_ORDER_IDR_ETHEREUM) {
            return Err(OrderFlowError::BelowChainMinimum);
        }
        let wallet_address = checksum_address(&order.wallet_address)?;
        let order = NewOrder { wallet_address, ..order };
        let created = self.db.create_order(order).await?;
        info!("🔄️ Order {} created: {} {} for {}", created.order_id, created.amount_token, created.symbol,
            created.amount_idr);
        for producer in &self.producers.new_order_producer {
            producer.publish_event(OrderEvent::new(created.clone())).await;
        }
        Ok(created)
    }

    /// Create (or regenerate) the payment instrument for a `Pending` order.
    ///
    /// The gateway order id is freshly generated per attempt; regenerating intentionally orphans webhooks for the
    /// previous instrument.
    pub async fn create_payment<P: PaymentProvider + ?Sized>(
        &self,
        order_id: &OrderId,
        method: PaymentMethod,
        provider: &P,
    ) -> Result<(Order, ChargeResponse), OrderFlowError> {
        let order = self
            .db
            .fetch_order(order_id)
            .await?
            .ok_or_else(|| PaymentGatewayError::OrderNotFound(order_id.clone()))?;
        if order.status != crate::db_types::OrderStatusType::Pending {
            return Err(PaymentGatewayError::OrderNotPending(order_id.clone()).into());
        }
        let midtrans_id = format!("{}-{}", order.order_id.as_str(), &uuid::Uuid::new_v4().simple().to_string()[..6]);
        let fee_idr = method.fee();
        let total_pay = order.amount_idr + fee_idr;
        let charge = provider
            .create_charge(ChargeRequest { gateway_order_id: midtrans_id.clone(), method, gross_amount: total_pay })
            .await?;
        let attachment = PaymentAttachment {
            midtrans_id,
            payment_url: charge.payment_url.clone(),
            payment_method: method,
            fee_idr,
            total_pay,
        };
        let updated = self.db.attach_payment(order_id, attachment).await?;
        info!("🔄️ Payment instrument ({method}) attached to {order_id}; total {total_pay}");
        Ok((updated, charge))
    }

    /// The webhook success path: conditional `Pending -> Paid`.
    ///
    /// Returns the updated order when this call effected the transition; the caller must then enqueue a payout
    /// job, exactly once. `None` means the order was already processed and nothing must happen.
    pub async fn handle_payment_success(&self, order_id: &OrderId) -> Result<Option<Order>, OrderFlowError> {
        let Some(order) = self.db.mark_paid(order_id).await? else {
            debug!("🔄️ Payment success for {order_id} was already handled; nothing to do");
            return Ok(None);
        };
        info!("🔄️ Order {order_id} is paid");
        for producer in &self.producers.order_paid_producer {
            producer.publish_event(OrderEvent::new(order.clone())).await;
        }
        Ok(Some(order))
    }

    /// User-facing cancel. Refused once the order has left `Pending`; idempotent when it is already inactive.
    pub async fn cancel_order(&self, order_id: &OrderId) -> Result<CancelOutcome, OrderFlowError> {
        let outcome = self.db.cancel_order(order_id).await?;
        if let CancelOutcome::Cancelled(order) = &outcome {
            info!("🔄️ Order {order_id} cancelled");
            for producer in &self.producers.order_annulled_producer {
                producer.publish_event(OrderAnnulledEvent::new(order.clone())).await;
            }
        }
        Ok(outcome)
    }

    /// Gateway-driven cancel (deny/cancel/expire on the gateway timeline). Unlike the user path, a refusal is not
    /// an error here: the order may legitimately have advanced past `Pending` in the meantime.
    pub async fn cancel_for_gateway(&self, order_id: &OrderId) -> Result<Option<Order>, OrderFlowError> {
        match self.db.cancel_order(order_id).await {
            Ok(CancelOutcome::Cancelled(order)) => {
                info!("🔄️ Order {order_id} cancelled on gateway signal");
                for producer in &self.producers.order_annulled_producer {
                    producer.publish_event(OrderAnnulledEvent::new(order.clone())).await;
                }
                Ok(Some(order))
            },
            Ok(CancelOutcome::AlreadyInactive(_)) => Ok(None),
            Err(PaymentGatewayError::CancelForbidden { order_id, status }) => {
                warn!("🔄️ Gateway reported failure for {order_id}, but it is already {status}; leaving it alone");
                Ok(None)
            },
            Err(e) => Err(e.into()),
        }
    }

    /// The payout executor: the single most important routine in the system.
    ///
    /// Exactly one invocation can win the `{Paid, tx_hash NULL} -> Processing` claim; every concurrent or repeated
    /// invocation either no-ops, recovers a recorded broadcast, or steals a claim whose worker died. A send is
    /// attempted at most once per claim, and a broadcast hash is persisted before finalisation so no code path can
    /// ever send twice for one order.
    pub async fn process_order<W: PayoutWallet + ?Sized>(
        &self,
        order_id: &OrderId,
        wallet: &W,
    ) -> Result<PayoutOutcome, OrderFlowError> {
        let order = match self.acquire_payout_claim(order_id).await? {
            ClaimResult::Execute(order) => order,
            ClaimResult::Done(outcome) => return Ok(outcome),
        };
        info!("🏦️ Sending {} {} on {} to {}", order.amount_token, order.symbol, order.chain, order.wallet_address);
        match wallet.send_native(&order.chain, &order.wallet_address, order.amount_token).await {
            Ok(tx_hash) => {
                let done = self.finalize(&order, &tx_hash).await?;
                Ok(PayoutOutcome::Completed(done))
            },
            Err(WalletError::TxBroadcasted { tx_hash }) => {
                warn!(
                    "🏦️ Broadcast ambiguity on {}: {tx_hash} is in flight but unconfirmed. Finalising with the \
                     broadcast hash.",
                    order.order_id
                );
                let done = self.finalize(&order, &tx_hash).await?;
                Ok(PayoutOutcome::Completed(done))
            },
            Err(e) if send_error::is_safe_failure(&e) => {
                warn!("🏦️ Safe send failure on {}: {e}. Refunding reservations.", order.order_id);
                let failed = self.db.fail_order(order_id).await?;
                for producer in &self.producers.order_annulled_producer {
                    producer.publish_event(OrderAnnulledEvent::new(failed.clone())).await;
                }
                Ok(PayoutOutcome::Failed(failed, e.to_string()))
            },
            Err(e) => {
                error!(
                    "🏦️ DOUBLE-SPEND RISK: send for {} failed ambiguously ({e}). The order stays in Processing; \
                     the stale-claim path will retry after operator review.",
                    order.order_id
                );
                for producer in &self.producers.payout_stuck_producer {
                    producer.publish_event(PayoutStuckEvent::new(order.clone(), e.to_string())).await;
                }
                Err(OrderFlowError::AmbiguousSendFailure { order_id: order_id.clone(), message: e.to_string() })
            },
        }
    }

    async fn acquire_payout_claim(&self, order_id: &OrderId) -> Result<ClaimResult, OrderFlowError> {
        for attempt in 0..MAX_CLAIM_ATTEMPTS {
            match self.db.claim_for_payout(order_id).await? {
                PayoutClaim::Claimed(order) => return Ok(ClaimResult::Execute(order)),
                PayoutClaim::AlreadySuccess(order) => {
                    debug!("🏦️ {order_id} is already Success; payout is a no-op");
                    return Ok(ClaimResult::Done(PayoutOutcome::AlreadyComplete(order)));
                },
                PayoutClaim::Recoverable(order) => {
                    let Some(tx_hash) = order.tx_hash.clone() else {
                        continue;
                    };
                    warn!("🏦️ {order_id} has recorded broadcast {tx_hash} but never finalised; recovering");
                    let done = self.finalize(&order, &tx_hash).await?;
                    return Ok(ClaimResult::Done(PayoutOutcome::Recovered(done)));
                },
                PayoutClaim::InProgress(order) => {
                    let age = Utc::now() - order.updated_at;
                    if age <= STALE_CLAIM_AGE {
                        debug!("🏦️ {order_id} is being processed by another worker; skipping");
                        return Ok(ClaimResult::Done(PayoutOutcome::Skipped(order)));
                    }
                    match self.db.steal_stale_claim(order_id, order.updated_at).await? {
                        Some(stolen) => {
                            warn!("🏦️ Stole stale claim on {order_id} (idle {} min)", age.num_minutes());
                            return Ok(ClaimResult::Execute(stolen));
                        },
                        None => {
                            debug!("🏦️ Lost the steal race on {order_id} (attempt {})", attempt + 1);
                        },
                    }
                },
                PayoutClaim::Ineligible(order) => {
                    debug!("🏦️ {order_id} is {}; not payable", order.status);
                    return Ok(ClaimResult::Done(PayoutOutcome::Skipped(order)));
                },
            }
        }
        Err(OrderFlowError::ClaimContention(order_id.clone()))
    }

    /// Record the hash, then finalise (Success + inventory deduct in one transaction), retrying the finalisation
    /// once after a second. A second failure leaves the order in the supported manual-reconciliation state.
    async fn finalize(&self, order: &Order, tx_hash: &str) -> Result<Order, OrderFlowError> {
        if let Err(e) = self.db.record_broadcast(&order.order_id, tx_hash).await {
            warn!("🏦️ Could not record broadcast hash for {}: {e}. Continuing to finalisation.", order.order_id);
        }
        let finalized = match self.db.finalize_success(&order.order_id, tx_hash).await {
            Ok(done) => done,
            Err(first) => {
                warn!("🏦️ Finalisation of {} failed ({first}); retrying once", order.order_id);
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                match self.db.finalize_success(&order.order_id, tx_hash).await {
                    Ok(done) => done,
                    Err(second) => {
                        error!(
                            "🏦️ DOUBLE-SPEND RISK: order {} is paid out in {tx_hash} but finalisation failed \
                             twice: {second}. Manual reconciliation required.",
                            order.order_id
                        );
                        for producer in &self.producers.payout_stuck_producer {
                            producer.publish_event(PayoutStuckEvent::new(order.clone(), second.to_string())).await;
                        }
                        return Err(OrderFlowError::FinalizeFailed {
                            order_id: order.order_id.clone(),
                            tx_hash: tx_hash.to_string(),
                            message: second.to_string(),
                        });
                    },
                }
            },
        };
        info!("🏦️ Order {} completed with tx {tx_hash}", finalized.order_id);
        for producer in &self.producers.order_completed_producer {
            producer.publish_event(OrderCompletedEvent::new(finalized.clone(), tx_hash.to_string())).await;
        }
        Ok(finalized)
    }

    /// The expiry sweep.
    ///
    /// For each over-age `Pending` order the gateway is consulted first when a payment exists: a settled payment
    /// diverts to the success path, a still-pending payment inside the grace window is skipped, and a gateway
    /// error blocks expiry entirely (a completed payment must never be expired on a hunch). The sweep also
    /// collects `Paid` orders whose payout enqueue was lost.
    pub async fn expire_sweep<P: PaymentProvider + ?Sized>(
        &self,
        provider: &P,
    ) -> Result<ExpirySweepResult, OrderFlowError> {
        let candidates = self.db.fetch_expiry_candidates(ORDER_PAYMENT_TTL).await?;
        let mut result = ExpirySweepResult::default();
        for order in candidates {
            if let Some(midtrans_id) = order.midtrans_id.clone() {
                match provider.transaction_status(&midtrans_id).await {
                    Ok(GatewayStatus::Settled) => {
                        info!("🕰️ {} was paid after all; diverting to the success path", order.order_id);
                        if let Some(paid) = self.handle_payment_success(&order.order_id).await? {
                            result.diverted.push(paid);
                        }
                        continue;
                    },
                    Ok(GatewayStatus::Pending) => {
                        let age = Utc::now() - order.created_at;
                        if age < GATEWAY_PENDING_GRACE {
                            debug!("🕰️ {} still pending at the gateway; grace period applies", order.order_id);
                            continue;
                        }
                    },
                    Ok(GatewayStatus::Failed) | Ok(GatewayStatus::NotFound) => {},
                    Err(e) => {
                        warn!(
                            "🕰️ Could not verify payment state of {} ({e}); NOT expiring a possibly-paid order",
                            order.order_id
                        );
                        continue;
                    },
                }
            }
            if let Some(expired) = self.db.expire_order(&order.order_id).await? {
                debug!("🕰️ Order {} expired", expired.order_id);
                for producer in &self.producers.order_annulled_producer {
                    producer.publish_event(OrderAnnulledEvent::new(expired.clone())).await;
                }
                result.expired.push(expired);
            }
        }
        result.rescued = self.db.fetch_stalled_paid_orders(STALLED_PAID_AGE).await?;
        if !result.rescued.is_empty() {
            warn!("🕰️ {} paid order(s) had no payout underway; re-enqueueing", result.rescued.len());
        }
        Ok(result)
    }

    /// User-triggered re-read of the gateway, which may promote (or cancel) the order.
    pub async fn sync_order<P: PaymentProvider + ?Sized>(
        &self,
        order_id: &OrderId,
        provider: &P,
    ) -> Result<(Order, Option<Order>), OrderFlowError> {
        let order = self
            .db
            .fetch_order(order_id)
            .await?
            .ok_or_else(|| PaymentGatewayError::OrderNotFound(order_id.clone()))?;
        let Some(midtrans_id) = order.midtrans_id.clone() else {
            return Ok((order, None));
        };
        if order.status != crate::db_types::OrderStatusType::Pending {
            return Ok((order, None));
        }
        let promoted = match provider.transaction_status(&midtrans_id).await? {
            GatewayStatus::Settled => self.handle_payment_success(order_id).await?,
            GatewayStatus::Failed => {
                self.cancel_for_gateway(order_id).await?;
                None
            },
            GatewayStatus::Pending | GatewayStatus::NotFound => None,
        };
        let latest = self.db.fetch_order(order_id).await?.unwrap_or(order);
        Ok((latest, promoted))
    }

    /// Admin override: finalise an order with an operator-supplied transaction hash, without sending anything.
    /// Routes through the same claim machinery as the executor so it cannot race a live payout.
    pub async fn mark_success_manual(
        &self,
        order_id: &OrderId,
        tx_hash: &str,
    ) -> Result<PayoutOutcome, OrderFlowError> {
        match self.acquire_payout_claim(order_id).await? {
            ClaimResult::Execute(order) => {
                let done = self.finalize(&order, tx_hash).await?;
                Ok(PayoutOutcome::Completed(done))
            },
            ClaimResult::Done(outcome) => Ok(outcome),
        }
    }
}
