//! Low-level SQLite access.
//!
//! Each submodule is a set of plain async functions over `&mut SqliteConnection`. Passing the connection in,
//! rather than holding a pool down here, is what lets `sqlite_impl` compose several calls into one transaction
//! where atomicity matters: an order insert, its inventory reservation and its voucher increment either all land
//! or none do.
use std::env;

use log::{debug, warn};
use sqlx::{sqlite::SqlitePoolOptions, Error as SqlxError, SqlitePool};

pub mod audit;
pub mod catalog;
pub mod inventory;
pub mod orders;
pub mod referrals;
pub mod settings;
pub mod users;
pub mod vouchers;

const DB_URL_VAR: &str = "RPG_DATABASE_URL";
const DEFAULT_DB_URL: &str = "sqlite://data/rupi_store.db";

/// Database URL from `RPG_DATABASE_URL`, with an on-disk default for local runs.
pub fn db_url() -> String {
    match env::var(DB_URL_VAR) {
        Ok(url) => url,
        Err(_) => {
            warn!("🗃️ {DB_URL_VAR} is not set; falling back to {DEFAULT_DB_URL}");
            DEFAULT_DB_URL.to_string()
        },
    }
}

pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, SqlxError> {
    debug!("🗃️ Opening a pool of {max_connections} connection(s) at {url}");
    SqlitePoolOptions::new().max_connections(max_connections).connect(url).await
}
