use async_trait::async_trait;
use rpg_common::Idr;
use thiserror::Error;

use crate::db_types::PaymentMethod;

/// The narrow seam to the fiat payment gateway. The production implementation wraps the Midtrans REST client; tests
/// substitute a mock.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Create a payment instrument (QRIS code or virtual account) for the given gateway order id. The gateway order
    /// id must be fresh per attempt; the gateway treats it as the idempotency key.
    async fn create_charge(&self, request: ChargeRequest) -> Result<ChargeResponse, ProviderError>;

    /// Query the settlement status of a previously created charge.
    async fn transaction_status(&self, gateway_order_id: &str) -> Result<GatewayStatus, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub gateway_order_id: String,
    pub method: PaymentMethod,
    pub gross_amount: Idr,
}

#[derive(Debug, Clone, Default)]
pub struct ChargeResponse {
    /// Deeplink or hosted payment page, when the gateway returns one.
    pub payment_url: Option<String>,
    /// Raw QR payload for QRIS charges.
    pub qr_string: Option<String>,
    /// Virtual account number for VA charges.
    pub va_number: Option<String>,
    pub expiry_time: Option<String>,
}

/// The gateway's view of a charge, reduced to what the order engine needs to decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    /// settlement / capture+accept; the money is in.
    Settled,
    /// The charge exists and is still payable.
    Pending,
    /// deny / cancel / expire / failure on the gateway timeline.
    Failed,
    /// The gateway has no record of this order id.
    NotFound,
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Could not reach the payment gateway: {0}")]
    Transport(String),
    #[error("The payment gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("The payment gateway returned an unreadable response: {0}")]
    MalformedResponse(String),
}
