use rpg_common::Idr;
use thiserror::Error;

use crate::db_types::{NewVoucher, Voucher};

/// Voucher ledger with atomic quota accounting.
///
/// The reservation increment for order creation happens inside the order transaction (see
/// `PaymentGatewayDatabase::create_order`); [`peek_voucher`](VoucherManagement::peek_voucher) performs the same
/// validations without consuming quota, for UIs that want to show the discount before confirmation.
#[allow(async_fn_in_trait)]
pub trait VoucherManagement: Clone + Send + Sync {
    async fn fetch_voucher(&self, code: &str) -> Result<Option<Voucher>, VoucherError>;

    /// All redemption validations, without the increment.
    async fn peek_voucher(&self, code: &str, user_id: i64, order_amount: Idr) -> Result<Voucher, VoucherError>;

    /// Atomic decrement of `usage_count`, floored with the predicate `usage_count > 0`. A zero-row update is
    /// ignored.
    async fn release_voucher(&self, voucher_id: i64) -> Result<(), VoucherError>;

    async fn create_voucher(&self, voucher: NewVoucher) -> Result<Voucher, VoucherError>;

    /// Deactivates vouchers past their `expires_at`. Returns the number affected.
    async fn expire_vouchers(&self) -> Result<u64, VoucherError>;
}

#[derive(Debug, Clone, Error)]
pub enum VoucherError {
    #[error("We have an internal database engine error (configuration/uptime etc.): {0}")]
    DatabaseError(String),
    #[error("Voucher code is not recognised")]
    NotFound,
    #[error("Voucher is no longer active")]
    Inactive,
    #[error("Voucher has expired")]
    Expired,
    #[error("Voucher belongs to another user")]
    NotOwner,
    #[error("Order must be at least {0} to use this voucher")]
    BelowMinimum(Idr),
    #[error("Voucher has already been redeemed by this user")]
    AlreadyRedeemed,
    #[error("An active order is already using this voucher")]
    InUse,
    #[error("Voucher quota has been exhausted")]
    QuotaExceeded,
    #[error("A voucher with this code already exists")]
    DuplicateCode,
}

impl From<sqlx::Error> for VoucherError {
    fn from(e: sqlx::Error) -> Self {
        VoucherError::DatabaseError(e.to_string())
    }
}
