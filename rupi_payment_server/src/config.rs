use std::env;

use log::*;
use midtrans_tools::MidtransConfig;
use rpg_common::Secret;
use rust_decimal::Decimal;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8430;
const DEFAULT_DATABASE_URL: &str = "sqlite://data/rupi_store.db";
/// Used until the FX endpoint has been reached at least once.
const DEFAULT_USD_IDR: &str = "15500";

#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Key-derivation password for the signing-key vault. Must be at least 32 characters.
    pub vault_password: Secret<String>,
    pub midtrans: MidtransConfig,
    pub default_usd_idr: Decimal,
    pub fx_url: Option<String>,
    pub price_stream_url: Option<String>,
    pub market_rest_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            vault_password: Secret::default(),
            midtrans: MidtransConfig::default(),
            default_usd_idr: DEFAULT_USD_IDR.parse().unwrap_or(Decimal::ZERO),
            fx_url: None,
            price_stream_url: None,
            market_rest_url: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env_or_default() -> Self {
        let host = env::var("RUPI_HOST").ok().unwrap_or_else(|| DEFAULT_HOST.into());
        let port = env::var("RUPI_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!("{s} is not a valid port for RUPI_PORT. {e} Using the default, {DEFAULT_PORT}, instead.");
                    DEFAULT_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_PORT);
        let database_url = env::var("RPG_DATABASE_URL").ok().unwrap_or_else(|| {
            warn!("RPG_DATABASE_URL is not set. Using the default, {DEFAULT_DATABASE_URL}.");
            DEFAULT_DATABASE_URL.into()
        });
        let vault_password = env::var("RUPI_VAULT_PASSWORD").map(Secret::new).unwrap_or_else(|_| {
            error!("RUPI_VAULT_PASSWORD is not set. Hot wallets cannot be unlocked without it.");
            Secret::default()
        });
        let default_usd_idr = env::var("RUPI_DEFAULT_USD_IDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| DEFAULT_USD_IDR.parse().unwrap_or(Decimal::ZERO));
        Self {
            host,
            port,
            database_url,
            vault_password,
            midtrans: MidtransConfig::from_env_or_default(),
            default_usd_idr,
            fx_url: env::var("RUPI_FX_URL").ok(),
            price_stream_url: env::var("RUPI_PRICE_STREAM_URL").ok(),
            market_rest_url: env::var("RUPI_MARKET_REST_URL").ok(),
        }
    }
}
