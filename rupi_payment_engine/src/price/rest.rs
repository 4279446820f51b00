//! REST fallback for the price cache: a bulk snapshot sweep on a timer, and the single-symbol refresh used by the
//! stale-while-revalidate path.
use std::{sync::Arc, time::Duration};

use log::{debug, warn};
use rust_decimal::Decimal;
use serde::Deserialize;

use super::{PriceCache, PriceEntry, PriceError};

const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const SINGLE_TIMEOUT: Duration = Duration::from_secs(5);
const BULK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct TickerPrice {
    symbol: String,
    price: String,
}

/// Thin client over the exchange's public ticker endpoint. Prices are quoted against USDT, which the engine treats
/// as USD.
#[derive(Clone)]
pub struct MarketRestClient {
    base_url: String,
    client: reqwest::Client,
}

impl MarketRestClient {
    pub fn new(base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Spot price of `<symbol>USDT`.
    pub async fn fetch_one(&self, symbol: &str) -> Result<Decimal, PriceError> {
        let pair = format!("{}USDT", symbol.to_ascii_uppercase());
        let url = format!("{}/api/v3/ticker/price", self.base_url);
        let ticker: TickerPrice = self
            .client
            .get(url)
            .query(&[("symbol", pair.as_str())])
            .timeout(SINGLE_TIMEOUT)
            .send()
            .await
            .map_err(|e| PriceError::Upstream(e.to_string()))?
            .error_for_status()
            .map_err(|e| PriceError::Upstream(e.to_string()))?
            .json()
            .await
            .map_err(|e| PriceError::Upstream(e.to_string()))?;
        ticker.price.parse().map_err(|_| PriceError::Upstream(format!("Unparseable price '{}'", ticker.price)))
    }

    /// The full ticker snapshot, filtered down to the tracked pairs.
    pub async fn fetch_all(&self, symbols: &[String]) -> Result<Vec<(String, Decimal)>, PriceError> {
        let url = format!("{}/api/v3/ticker/price", self.base_url);
        let tickers: Vec<TickerPrice> = self
            .client
            .get(url)
            .timeout(BULK_TIMEOUT)
            .send()
            .await
            .map_err(|e| PriceError::Upstream(e.to_string()))?
            .error_for_status()
            .map_err(|e| PriceError::Upstream(e.to_string()))?
            .json()
            .await
            .map_err(|e| PriceError::Upstream(e.to_string()))?;
        let mut result = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let pair = format!("{}USDT", symbol.to_ascii_uppercase());
            let Some(ticker) = tickers.iter().find(|t| t.symbol == pair) else {
                warn!("📈️ No ticker for {pair} in the snapshot");
                continue;
            };
            match ticker.price.parse::<Decimal>() {
                Ok(price) => result.push((symbol.to_ascii_uppercase(), price)),
                Err(_) => warn!("📈️ Unparseable snapshot price '{}' for {pair}", ticker.price),
            }
        }
        Ok(result)
    }
}

/// One scheduled sweep: pull the snapshot and upsert every tracked symbol with `source=rest`.
pub async fn refresh_all(
    cache: &Arc<PriceCache>,
    market: &MarketRestClient,
    symbols: &[String],
) -> Result<usize, PriceError> {
    let prices = market.fetch_all(symbols).await?;
    let count = prices.len();
    for (symbol, price) in prices {
        cache.upsert(PriceEntry::rest(&symbol, price));
    }
    debug!("📈️ REST sweep refreshed {count} symbols");
    Ok(count)
}
