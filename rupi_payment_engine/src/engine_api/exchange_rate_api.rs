//! The USD/IDR rate with a 24-hour freshness policy: serve the stored rate while fresh, refresh on demand from a
//! public FX endpoint, and fall back to the stored (or configured) rate when the endpoint is down.
use std::time::Duration;

use chrono::Utc;
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::{
    db_types::ExchangeRate,
    traits::{ExchangeRateError, ExchangeRates},
};

pub const USD_CURRENCY: &str = "USD";
/// Stored rates older than this trigger a refresh attempt.
const RATE_FRESHNESS: chrono::Duration = chrono::Duration::hours(24);
const FX_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_FX_URL: &str = "https://open.er-api.com/v6/latest/USD";

#[derive(Debug, Deserialize)]
struct FxResponse {
    rates: std::collections::HashMap<String, f64>,
}

#[derive(Clone)]
pub struct ExchangeRateApi<B> {
    db: B,
    client: reqwest::Client,
    fx_url: String,
    /// Used when neither a stored nor a remote rate is available.
    fallback_rate: Decimal,
}

impl<B> ExchangeRateApi<B>
where B: ExchangeRates
{
    pub fn new(db: B, fx_url: Option<&str>, fallback_rate: Decimal) -> Self {
        Self {
            db,
            client: reqwest::Client::new(),
            fx_url: fx_url.unwrap_or(DEFAULT_FX_URL).to_string(),
            fallback_rate,
        }
    }

    /// The rupiah per US dollar.
    pub async fn usd_idr(&self) -> Result<Decimal, ExchangeRateError> {
        let stored = match self.db.fetch_last_rate(USD_CURRENCY).await {
            Ok(rate) => {
                if Utc::now() - rate.updated_at < RATE_FRESHNESS {
                    return Ok(rate.rate);
                }
                Some(rate)
            },
            Err(ExchangeRateError::RateDoesNotExist(_)) => None,
            Err(e) => return Err(e),
        };
        match self.fetch_remote().await {
            Ok(fresh) => {
                let record = ExchangeRate::new(USD_CURRENCY, fresh);
                if let Err(e) = self.db.set_exchange_rate(&record).await {
                    warn!("💱️ Could not store refreshed USD/IDR rate: {e}");
                }
                debug!("💱️ USD/IDR refreshed to {fresh}");
                Ok(fresh)
            },
            Err(e) => {
                warn!("💱️ FX endpoint unavailable ({e}); using stored/fallback rate");
                Ok(stored.map(|r| r.rate).unwrap_or(self.fallback_rate))
            },
        }
    }

    /// Force a refresh regardless of freshness; used by the scheduled sweep.
    pub async fn refresh(&self) -> Result<Decimal, ExchangeRateError> {
        let fresh = self.fetch_remote().await?;
        self.db.set_exchange_rate(&ExchangeRate::new(USD_CURRENCY, fresh)).await?;
        Ok(fresh)
    }

    async fn fetch_remote(&self) -> Result<Decimal, ExchangeRateError> {
        let response: FxResponse = self
            .client
            .get(&self.fx_url)
            .timeout(FX_TIMEOUT)
            .send()
            .await
            .map_err(|e| ExchangeRateError::DatabaseError(format!("FX request failed: {e}")))?
            .error_for_status()
            .map_err(|e| ExchangeRateError::DatabaseError(format!("FX request rejected: {e}")))?
            .json()
            .await
            .map_err(|e| ExchangeRateError::DatabaseError(format!("Unreadable FX response: {e}")))?;
        let idr = response
            .rates
            .get("IDR")
            .copied()
            .ok_or_else(|| ExchangeRateError::RateDoesNotExist("IDR".to_string()))?;
        Decimal::try_from(idr).map_err(|_| ExchangeRateError::MalformedRate(idr.to_string()))
    }
}
