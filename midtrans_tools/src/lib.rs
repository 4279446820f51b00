//! A self-contained client for the Midtrans Core API: creating QRIS and virtual-account charges, querying
//! transaction status, and verifying webhook signatures. It knows nothing about the payment engine; the server
//! crate adapts it to the engine's `PaymentProvider` seam.

mod api;
mod config;
mod data_objects;
mod error;
pub mod helpers;

pub use api::MidtransApi;
pub use config::{MidtransConfig, MidtransEnvironment};
pub use data_objects::{
    ChargeApiResponse, PaymentClass, StatusResponse, VaBank, SETTLED_STATUSES,
};
pub use error::MidtransApiError;
