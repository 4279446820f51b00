use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use log::error;
use rpg_common::{Idr, TokenAmount};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid conversion: {0}")]
pub struct ConversionError(pub String);

//--------------------------------------   OrderStatusType   ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum OrderStatusType {
    /// The order exists and is waiting for the user to pay.
    Pending,
    /// The payment gateway confirmed the fiat payment; the payout has not started yet.
    Paid,
    /// A payout worker holds the exclusive claim on this order and may be sending funds right now.
    Processing,
    /// The on-chain transfer is confirmed. Terminal.
    Success,
    /// The payout failed safely (no funds left the wallet) and reservations were refunded. Terminal.
    Failed,
    /// The user or the gateway cancelled the order before payment. Terminal.
    Cancelled,
    /// The order aged out before payment. Terminal.
    Expired,
}

impl OrderStatusType {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled | Self::Expired)
    }
}

impl Display for OrderStatusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatusType::Pending => write!(f, "Pending"),
            OrderStatusType::Paid => write!(f, "Paid"),
            OrderStatusType::Processing => write!(f, "Processing"),
            OrderStatusType::Success => write!(f, "Success"),
            OrderStatusType::Failed => write!(f, "Failed"),
            OrderStatusType::Cancelled => write!(f, "Cancelled"),
            OrderStatusType::Expired => write!(f, "Expired"),
        }
    }
}

impl FromStr for OrderStatusType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Paid" => Ok(Self::Paid),
            "Processing" => Ok(Self::Processing),
            "Success" => Ok(Self::Success),
            "Failed" => Ok(Self::Failed),
            "Cancelled" => Ok(Self::Cancelled),
            "Expired" => Ok(Self::Expired),
            s => Err(ConversionError(format!("Invalid order status: {s}"))),
        }
    }
}

impl From<String> for OrderStatusType {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid order status: {value}. But this conversion cannot fail. Defaulting to Pending");
            OrderStatusType::Pending
        })
    }
}

//--------------------------------------    PaymentMethod    ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentMethod {
    Qris,
    Va,
}

impl PaymentMethod {
    /// The flat gateway fee the user pays on top of the order amount.
    pub fn fee(&self) -> Idr {
        match self {
            PaymentMethod::Qris => Idr::zero(),
            PaymentMethod::Va => Idr::from(4000),
        }
    }
}

impl Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentMethod::Qris => write!(f, "Qris"),
            PaymentMethod::Va => write!(f, "Va"),
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "QRIS" => Ok(Self::Qris),
            "VA" => Ok(Self::Va),
            s => Err(ConversionError(format!("Invalid payment method: {s}"))),
        }
    }
}

//--------------------------------------      ChainType      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum ChainType {
    Evm,
    Solana,
    Sui,
}

impl Display for ChainType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainType::Evm => write!(f, "Evm"),
            ChainType::Solana => write!(f, "Solana"),
            ChainType::Sui => write!(f, "Sui"),
        }
    }
}

impl FromStr for ChainType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "evm" => Ok(Self::Evm),
            "solana" => Ok(Self::Solana),
            "sui" => Ok(Self::Sui),
            s => Err(ConversionError(format!("Invalid chain type: {s}"))),
        }
    }
}

//--------------------------------------        Role         ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum Role {
    User,
    Admin,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "User"),
            Role::Admin => write!(f, "Admin"),
        }
    }
}

impl FromStr for Role {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "User" => Ok(Self::User),
            "Admin" => Ok(Self::Admin),
            s => Err(ConversionError(format!("Invalid role: {s}"))),
        }
    }
}

//--------------------------------------       OrderId       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct OrderId(pub String);

impl OrderId {
    /// Generates a fresh order id. The `RP-` prefix keeps gateway dashboards legible.
    pub fn random() -> Self {
        Self(format!("RP-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for OrderId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

//--------------------------------------        Order        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub order_id: OrderId,
    pub user_id: i64,
    pub chain: String,
    pub symbol: String,
    /// The payable fiat amount after any voucher discount, excluding the gateway fee.
    pub amount_idr: Idr,
    pub amount_token: TokenAmount,
    pub markup_percent: f64,
    pub wallet_address: String,
    pub voucher_id: Option<i64>,
    pub status: OrderStatusType,
    pub payment_method: Option<PaymentMethod>,
    pub fee_idr: Idr,
    pub total_pay: Idr,
    pub tx_hash: Option<String>,
    pub midtrans_id: Option<String>,
    pub payment_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    /// The amount the gateway is expected to settle for this order.
    pub fn expected_settlement(&self) -> Idr {
        if self.total_pay.is_positive() {
            self.total_pay
        } else {
            self.amount_idr
        }
    }
}

//--------------------------------------      NewOrder       ---------------------------------------------------------
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: i64,
    pub chain: String,
    pub symbol: String,
    /// The pre-discount fiat amount the user asked to spend.
    pub amount_idr: Idr,
    pub amount_token: TokenAmount,
    pub markup_percent: f64,
    /// Checksum-normalised destination address.
    pub wallet_address: String,
    pub voucher_code: Option<String>,
}

impl NewOrder {
    pub fn new(user_id: i64, chain: impl Into<String>, symbol: impl Into<String>, amount_idr: Idr) -> Self {
        Self {
            user_id,
            chain: chain.into(),
            symbol: symbol.into(),
            amount_idr,
            amount_token: TokenAmount::zero(),
            markup_percent: 0.0,
            wallet_address: String::new(),
            voucher_code: None,
        }
    }

    pub fn with_payout(mut self, amount_token: TokenAmount, markup_percent: f64, wallet_address: &str) -> Self {
        self.amount_token = amount_token;
        self.markup_percent = markup_percent;
        self.wallet_address = wallet_address.to_string();
        self
    }

    pub fn with_voucher(mut self, code: &str) -> Self {
        self.voucher_code = Some(code.to_string());
        self
    }
}

//--------------------------------------  PaymentAttachment  ---------------------------------------------------------
/// The gateway artefacts attached to an order when a payment instrument is created.
#[derive(Debug, Clone)]
pub struct PaymentAttachment {
    /// The gateway-side order id. Regenerated on every attempt so stale webhooks orphan on lookup.
    pub midtrans_id: String,
    pub payment_url: Option<String>,
    pub payment_method: PaymentMethod,
    pub fee_idr: Idr,
    pub total_pay: Idr,
}

//--------------------------------------        Chain        ---------------------------------------------------------
#[derive(Debug, Clone, FromRow)]
pub struct Chain {
    pub id: i64,
    pub slug: String,
    pub chain_type: ChainType,
    pub rpc_url: String,
    pub explorer_url: Option<String>,
    pub chain_id: i64,
    /// `salt:iv:ciphertext` blob; see `wallet::vault`.
    pub encrypted_key: String,
    /// Confirmations to await before an EVM payout is considered final.
    pub confirmations: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------        Token        ---------------------------------------------------------
#[derive(Debug, Clone, FromRow)]
pub struct Token {
    pub id: i64,
    pub chain: String,
    pub symbol: String,
    pub is_native: bool,
    pub decimals: i64,
    pub markup_percent: f64,
    pub active: bool,
}

//--------------------------------------   InventoryRecord   ---------------------------------------------------------
#[derive(Debug, Clone, FromRow)]
pub struct InventoryRecord {
    pub id: i64,
    pub chain: String,
    pub symbol: String,
    /// The synced hot-wallet balance for this asset.
    pub balance: TokenAmount,
    /// The amount committed to active orders and not yet deducted. `0 <= reserved <= balance` at every atomic
    /// boundary.
    pub reserved: TokenAmount,
    pub updated_at: DateTime<Utc>,
}

impl InventoryRecord {
    pub fn available(&self) -> TokenAmount {
        self.balance - self.reserved
    }
}

//--------------------------------------       Voucher       ---------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Voucher {
    pub id: i64,
    pub code: String,
    /// `None` for public vouchers; otherwise only this user may redeem it.
    pub owner_user_id: Option<i64>,
    pub value: Idr,
    pub min_amount: Idr,
    pub max_usage: i64,
    pub usage_count: i64,
    pub active: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Voucher {
    /// The discount this voucher applies to an order of `amount`, floored at zero rupiah payable.
    pub fn discounted(&self, amount: Idr) -> Idr {
        let payable = amount.value() - self.value.value();
        Idr::from(payable.max(0))
    }
}

#[derive(Debug, Clone)]
pub struct NewVoucher {
    pub code: String,
    pub owner_user_id: Option<i64>,
    pub value: Idr,
    pub min_amount: Idr,
    pub max_usage: i64,
    pub expires_at: DateTime<Utc>,
}

//--------------------------------------      Referral       ---------------------------------------------------------
#[derive(Debug, Clone, FromRow)]
pub struct Referral {
    pub id: i64,
    pub referrer_id: i64,
    pub referee_id: i64,
    pub is_valid: bool,
    pub reward_given: bool,
    pub created_at: DateTime<Utc>,
    pub validated_at: Option<DateTime<Utc>>,
}

//--------------------------------------        User         ---------------------------------------------------------
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub email: Option<String>,
    pub chat_id: Option<String>,
    pub referral_code: String,
    pub referred_by: Option<i64>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub email: Option<String>,
    pub chat_id: Option<String>,
    /// Referral code of the referrer, if one was presented at registration.
    pub referral_code_used: Option<String>,
}

//--------------------------------------   ExchangeRate      ---------------------------------------------------------
#[derive(Debug, Clone)]
pub struct ExchangeRate {
    pub base_currency: String,
    pub rate: rust_decimal::Decimal,
    pub updated_at: DateTime<Utc>,
}

impl ExchangeRate {
    pub fn new(base_currency: impl Into<String>, rate: rust_decimal::Decimal) -> Self {
        Self { base_currency: base_currency.into(), rate, updated_at: Utc::now() }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in [
            OrderStatusType::Pending,
            OrderStatusType::Paid,
            OrderStatusType::Processing,
            OrderStatusType::Success,
            OrderStatusType::Failed,
            OrderStatusType::Cancelled,
            OrderStatusType::Expired,
        ] {
            assert_eq!(status.to_string().parse::<OrderStatusType>().unwrap(), status);
        }
        assert!("Unknown".parse::<OrderStatusType>().is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(OrderStatusType::Success.is_terminal());
        assert!(OrderStatusType::Failed.is_terminal());
        assert!(OrderStatusType::Cancelled.is_terminal());
        assert!(OrderStatusType::Expired.is_terminal());
        assert!(!OrderStatusType::Pending.is_terminal());
        assert!(!OrderStatusType::Paid.is_terminal());
        assert!(!OrderStatusType::Processing.is_terminal());
    }

    #[test]
    fn payment_method_fees() {
        assert_eq!(PaymentMethod::Qris.fee(), Idr::zero());
        assert_eq!(PaymentMethod::Va.fee(), Idr::from(4000));
        assert_eq!("qris".parse::<PaymentMethod>().unwrap(), PaymentMethod::Qris);
        assert_eq!("VA".parse::<PaymentMethod>().unwrap(), PaymentMethod::Va);
    }

    #[test]
    fn voucher_discount_floors_at_zero() {
        let voucher = Voucher {
            id: 1,
            code: "P10K".into(),
            owner_user_id: None,
            value: Idr::from(10_000),
            min_amount: Idr::from(50_000),
            max_usage: 100,
            usage_count: 0,
            active: true,
            expires_at: Utc::now(),
            created_at: Utc::now(),
        };
        assert_eq!(voucher.discounted(Idr::from(100_000)), Idr::from(90_000));
        assert_eq!(voucher.discounted(Idr::from(5_000)), Idr::zero());
    }

    #[test]
    fn order_ids_are_unique() {
        assert_ne!(OrderId::random(), OrderId::random());
        assert!(OrderId::random().as_str().starts_with("RP-"));
    }
}
