//! Rupi Payment Engine
//!
//! The Rupi Payment Engine is the core of a retail crypto purchase service: it accepts rupiah payments through a
//! payment gateway and dispatches native cryptocurrency from a custodial hot wallet to the buyer's address. The
//! engine guarantees that every successful fiat payment results in exactly one on-chain transfer of the correct
//! asset to the correct address, in spite of concurrent user actions, gateway retries, worker crashes and RPC
//! flakiness.
//!
//! The library is divided into a few main sections:
//! 1. Database management and control. SQLite is the supported backend. You should never need to access the
//!    database directly; use the public API in [`engine_api`] instead. The exception is the data types used in the
//!    database, which are defined in the [`db_types`] module and are public.
//! 2. The engine APIs: order flow (creation, payment, payout execution, expiry), quoting, referrals and the
//!    conversation state machine backing the interactive checkout.
//! 3. Infrastructure the engine owns: the streaming price cache, the hot wallet manager and the key-value store
//!    used for distributed locks.
//!
//! The engine also provides a set of events that can be subscribed to. A simple actor framework is used so that the
//! server can hook into order lifecycle events (paid, completed, failed, annulled) and perform custom actions such
//! as notifications.

pub mod db_types;
pub mod engine_api;
pub mod events;
pub mod helpers;
pub mod kv_store;
pub mod price;
mod sqlite;
pub mod test_utils;
pub mod traits;
pub mod wallet;

pub use engine_api::{
    ConversationApi, ExchangeRateApi, OrderFlowApi, OrderFlowError, PayoutOutcome, PayoutQueue, QuoteApi, ReferralApi,
};
pub use sqlite::{apply_migrations, SqliteDatabase};
