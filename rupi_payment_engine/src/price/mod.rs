//! Live token pricing: a streaming market-data writer, a REST refresher and a stale-while-revalidate read path.
//!
//! Two writers keep the per-symbol cache warm: the persistent mini-ticker stream ([`stream`]) and the scheduled
//! bulk REST sweep ([`rest`]). Readers go through [`PriceReader`], which serves fresh values immediately, serves
//! stale values while kicking a guarded background refresh, and only blocks on a total miss.
//!
//! Price reads never fall through to the relational store.

mod cache;
pub mod rest;
pub mod stream;

use std::{sync::Arc, time::Duration as StdDuration};

pub use cache::{PriceCache, PriceEntry, PriceSource};
use chrono::{Duration, Utc};
use log::{debug, warn};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::kv_store::{acquire_lock, KeyValueStore, LockError, LockOptions};

/// Serve-stale threshold: entries younger than this are returned without any refresh.
pub const SWR_WINDOW: Duration = Duration::seconds(60);
/// Per-symbol refresh guard TTL.
const REFRESH_LOCK_TTL: StdDuration = StdDuration::from_secs(10);
/// How long a reader polls the cache when another reader holds the refresh lock on a total miss.
const MISS_POLL_BUDGET: StdDuration = StdDuration::from_secs(2);
const MISS_POLL_INTERVAL: StdDuration = StdDuration::from_millis(100);

#[derive(Debug, Clone, Error)]
pub enum PriceError {
    #[error("No price is available for {0}")]
    PriceUnavailable(String),
    #[error("Market data request failed: {0}")]
    Upstream(String),
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),
}

/// The stale-while-revalidate read path over the price cache.
#[derive(Clone)]
pub struct PriceReader {
    cache: Arc<PriceCache>,
    kv: Arc<dyn KeyValueStore>,
    market: rest::MarketRestClient,
}

impl PriceReader {
    pub fn new(cache: Arc<PriceCache>, kv: Arc<dyn KeyValueStore>, market: rest::MarketRestClient) -> Self {
        Self { cache, kv, market }
    }

    /// Current USD price for a native symbol (e.g. `BNB`).
    ///
    /// * Fresh entry (younger than [`SWR_WINDOW`]): returned immediately.
    /// * Stale entry: returned immediately while a lock-guarded single-symbol refresh runs in the background.
    /// * Miss: fetch synchronously under the refresh lock; if the lock is held, poll the cache for up to two
    ///   seconds, then fail with [`PriceError::PriceUnavailable`].
    pub async fn price_usd(&self, symbol: &str) -> Result<Decimal, PriceError> {
        if let Some(entry) = self.cache.get(symbol) {
            let age = Utc::now() - entry.ts;
            if age <= SWR_WINDOW {
                return Ok(entry.price_usd);
            }
            self.spawn_revalidation(symbol);
            return Ok(entry.price_usd);
        }
        self.fetch_on_miss(symbol).await
    }

    fn spawn_revalidation(&self, symbol: &str) {
        let reader = self.clone();
        let symbol = symbol.to_string();
        tokio::spawn(async move {
            let lock_key = format!("lock:price:{symbol}");
            let lock = match acquire_lock(reader.kv.as_ref(), &lock_key, LockOptions::try_once(REFRESH_LOCK_TTL)).await
            {
                Ok(lock) => lock,
                // Someone else is already refreshing this symbol.
                Err(LockError::Acquisition(_)) => return,
                Err(e) => {
                    warn!("📈️ Could not take refresh lock for {symbol}: {e}");
                    return;
                },
            };
            match reader.market.fetch_one(&symbol).await {
                Ok(price) => {
                    reader.cache.upsert(PriceEntry::rest(&symbol, price));
                    debug!("📈️ Revalidated {symbol} at {price}");
                },
                Err(e) => warn!("📈️ Background refresh for {symbol} failed: {e}"),
            }
            lock.release(reader.kv.as_ref()).await;
        });
    }

    async fn fetch_on_miss(&self, symbol: &str) -> Result<Decimal, PriceError> {
        let lock_key = format!("lock:price:{symbol}");
        match acquire_lock(self.kv.as_ref(), &lock_key, LockOptions::try_once(REFRESH_LOCK_TTL)).await {
            Ok(lock) => {
                let result = self.market.fetch_one(symbol).await;
                if let Ok(price) = &result {
                    self.cache.upsert(PriceEntry::rest(symbol, *price));
                }
                lock.release(self.kv.as_ref()).await;
                result.map_err(|e| {
                    warn!("📈️ Synchronous price fetch for {symbol} failed: {e}");
                    PriceError::PriceUnavailable(symbol.to_string())
                })
            },
            Err(LockError::Acquisition(_)) => {
                // Another reader is fetching; wait for its result to land in the cache.
                let deadline = tokio::time::Instant::now() + MISS_POLL_BUDGET;
                while tokio::time::Instant::now() < deadline {
                    tokio::time::sleep(MISS_POLL_INTERVAL).await;
                    if let Some(entry) = self.cache.get(symbol) {
                        return Ok(entry.price_usd);
                    }
                }
                Err(PriceError::PriceUnavailable(symbol.to_string()))
            },
            Err(e) => Err(e.into()),
        }
    }
}
