//! The public APIs of the payment engine.
//!
//! Each API is a thin generic struct over the database traits it needs, so the server can hand every API the same
//! backend instance and tests can substitute lighter ones.

mod conversation_api;
mod exchange_rate_api;
mod order_flow_api;
pub mod order_objects;
mod payout_queue;
mod quote_api;
mod referral_api;

pub use conversation_api::{
    check_slippage, ConversationApi, ConversationError, ConversationState, ConversationStep,
    SLIPPAGE_TOLERANCE_PERCENT,
};
pub use exchange_rate_api::ExchangeRateApi;
pub use order_flow_api::{
    OrderFlowApi, OrderFlowError, PayoutOutcome, GATEWAY_PENDING_GRACE, MIN_ORDER_IDR_ETHEREUM, ORDER_PAYMENT_TTL,
    STALE_CLAIM_AGE,
};
pub use payout_queue::PayoutQueue;
pub use quote_api::{InventoryStatus, Quote, QuoteApi, QuoteError};
pub use referral_api::{ReferralApi, ReferralApiError};
