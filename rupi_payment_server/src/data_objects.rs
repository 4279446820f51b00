//! JSON request/response shapes for the HTTP surface.
use rpg_common::{Idr, TokenAmount};
use rupi_payment_engine::db_types::{Order, OrderStatusType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteParams {
    pub chain: String,
    /// Accepts `100000`, `100.000`, `Rp 100.000` and friends.
    pub amount_idr: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub chain: String,
    pub amount_idr: String,
    pub wallet_address: String,
    pub voucher_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PayRequest {
    /// `QRIS` or `VA`.
    pub method: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkSuccessRequest {
    pub tx_hash: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: String,
    pub chain: String,
    pub symbol: String,
    pub amount_idr: Idr,
    pub amount_token: TokenAmount,
    pub wallet_address: String,
    pub status: OrderStatusType,
    pub fee_idr: Idr,
    pub total_pay: Idr,
    pub payment_url: Option<String>,
    pub tx_hash: Option<String>,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.order_id.as_str().to_string(),
            chain: order.chain.clone(),
            symbol: order.symbol.clone(),
            amount_idr: order.amount_idr,
            amount_token: order.amount_token,
            wallet_address: order.wallet_address.clone(),
            status: order.status,
            fee_idr: order.fee_idr,
            total_pay: order.total_pay,
            payment_url: order.payment_url.clone(),
            tx_hash: order.tx_hash.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub order_id: String,
    pub payment_url: Option<String>,
    pub qr_string: Option<String>,
    pub va_number: Option<String>,
    pub fee: Idr,
    pub total_pay: Idr,
    pub expiry_time: Option<String>,
}

/// The webhook notification shape shared by Midtrans status queries and notifications. Parsed strictly: a type
/// mismatch rejects the whole payload.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub order_id: String,
    pub status_code: String,
    pub gross_amount: String,
    pub signature_key: String,
    pub transaction_status: String,
    #[serde(default)]
    pub fraud_status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JsonResponse {
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }
}
