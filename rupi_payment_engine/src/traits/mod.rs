//! The traits that define the behaviour of the engine's pluggable backends.
//!
//! The database traits ([`PaymentGatewayDatabase`], [`InventoryManagement`], [`VoucherManagement`],
//! [`ReferralManagement`], [`CatalogManagement`], [`ExchangeRates`], [`SettingsManagement`]) are implemented by the
//! SQLite backend and keep the engine storage-agnostic. The outward-facing traits ([`PaymentProvider`],
//! [`ChainClient`], [`PayoutWallet`]) are the seams through which the payment gateway and the blockchains are
//! reached, and are mocked in tests.

mod catalog_management;
mod data_objects;
mod exchange_rates;
mod inventory_management;
mod payment_gateway_database;
mod payment_provider;
mod referral_management;
mod voucher_management;
mod wallet_management;

pub use catalog_management::{CatalogError, CatalogManagement};
pub use data_objects::{CancelOutcome, ExpirySweepResult, PayoutClaim};
pub use exchange_rates::{ExchangeRateError, ExchangeRates, SettingsManagement};
pub use inventory_management::{InventoryError, InventoryManagement};
pub use payment_gateway_database::{PaymentGatewayDatabase, PaymentGatewayError};
pub use payment_provider::{ChargeRequest, ChargeResponse, GatewayStatus, PaymentProvider, ProviderError};
pub use referral_management::{ReferralError, ReferralManagement};
pub use voucher_management::{VoucherError, VoucherManagement};
pub use wallet_management::{ChainClient, PayoutWallet, WalletError};
