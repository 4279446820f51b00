use serde::{Deserialize, Serialize};

use crate::db_types::{Order, OrderStatusType};

/// Carried by both the new-order and order-paid hooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order: Order,
}

impl OrderEvent {
    pub fn new(order: Order) -> Self {
        Self { order }
    }
}

/// The payout confirmed on-chain and the order is `Success`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCompletedEvent {
    pub order: Order,
    pub tx_hash: String,
}

impl OrderCompletedEvent {
    pub fn new(order: Order, tx_hash: String) -> Self {
        Self { order, tx_hash }
    }
}

/// The order left the active path without a payout: cancelled, expired, or safely failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAnnulledEvent {
    pub order: Order,
    pub status: OrderStatusType,
}

impl OrderAnnulledEvent {
    pub fn new(order: Order) -> Self {
        let status = order.status;
        Self { order, status }
    }
}

/// Operator alert: a payout hit an ambiguous error and the order is frozen in `Processing`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutStuckEvent {
    pub order: Order,
    pub error: String,
}

impl PayoutStuckEvent {
    pub fn new(order: Order, error: String) -> Self {
        Self { order, error }
    }
}

/// A referral reward voucher was granted to a referrer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferralRewardEvent {
    pub referrer_id: i64,
    pub voucher_code: String,
    /// `true` for the every-20th-referral milestone bonus.
    pub milestone: bool,
}
