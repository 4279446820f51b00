use thiserror::Error;

use crate::db_types::ExchangeRate;

/// Storage for currency exchange rates, currently only USD/IDR. Rates are appended, never updated, so the history
/// survives for audit.
#[allow(async_fn_in_trait)]
pub trait ExchangeRates: Clone + Send + Sync {
    /// Fetch the most recent rate for the given base currency.
    async fn fetch_last_rate(&self, base_currency: &str) -> Result<ExchangeRate, ExchangeRateError>;

    /// Save the exchange rate for the given currency to the backend storage.
    ///
    /// The `updated_at` field of the given rate is ignored; the backend sets it to the current time.
    async fn set_exchange_rate(&self, new_rate: &ExchangeRate) -> Result<(), ExchangeRateError>;
}

/// Key-value settings persisted in the database (default markup, referral reward value, and similar knobs that
/// admins tune without a redeploy).
#[allow(async_fn_in_trait)]
pub trait SettingsManagement: Clone + Send + Sync {
    async fn fetch_setting(&self, key: &str) -> Result<Option<String>, ExchangeRateError>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<(), ExchangeRateError>;
}

#[derive(Debug, Clone, Error)]
pub enum ExchangeRateError {
    #[error("We have an internal database engine error (configuration/uptime etc.): {0}")]
    DatabaseError(String),
    #[error("No exchange rate has been recorded for {0}")]
    RateDoesNotExist(String),
    #[error("'{0}' cannot be read as a decimal rate")]
    MalformedRate(String),
}

impl From<sqlx::Error> for ExchangeRateError {
    fn from(e: sqlx::Error) -> Self {
        ExchangeRateError::DatabaseError(e.to_string())
    }
}
