//! The streaming price writer: one persistent connection to the exchange's combined mini-ticker stream, feeding the
//! cache with `source=ws` entries.
//!
//! Event-time lag above five seconds means the socket is replaying a backlog; those events are dropped rather than
//! written over fresher REST data. A watchdog tears the connection down after sixty silent seconds, and reconnects
//! run on exponential backoff from a five-second base. A rolling sixty-second window of counters is logged so
//! operators can see stream health at a glance.
use std::{collections::HashSet, sync::Arc, time::Duration};

use chrono::Utc;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, info, warn};
use serde::Deserialize;
use tokio::{task::JoinHandle, time::Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{PriceCache, PriceEntry};

pub const DEFAULT_STREAM_URL: &str = "wss://stream.binance.com:9443/ws/!miniTicker@arr";

/// Events with more lag than this are stale bloat from a replaying socket.
const MAX_EVENT_LAG_MS: i64 = 5_000;
/// Silence threshold after which the connection is presumed dead.
const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(60);
/// Reconnect backoff base; doubles per consecutive failure.
const BACKOFF_BASE: Duration = Duration::from_secs(5);
const BACKOFF_CAP: Duration = Duration::from_secs(60);
/// Metrics window length.
const METRICS_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct PriceStreamConfig {
    pub url: String,
    /// Native symbols to track, e.g. `["BNB", "ETH", "POL"]`. The stream reports `<SYMBOL>USDT` pairs.
    pub symbols: Vec<String>,
}

impl PriceStreamConfig {
    pub fn new(symbols: Vec<String>) -> Self {
        Self { url: DEFAULT_STREAM_URL.to_string(), symbols }
    }
}

#[derive(Debug, Deserialize)]
struct MiniTicker {
    /// Pair symbol, e.g. `BNBUSDT`.
    #[serde(rename = "s")]
    symbol: String,
    /// Close (latest) price.
    #[serde(rename = "c")]
    close: String,
    /// Event time in epoch milliseconds.
    #[serde(rename = "E")]
    event_time_ms: i64,
}

#[derive(Default)]
struct WindowMetrics {
    updates: u64,
    drops: u64,
    errors: u64,
    max_lag_ms: i64,
}

impl WindowMetrics {
    fn roll(&mut self) {
        info!(
            "📈️ Stream window: {} updates, {} dropped (stale), {} errors, max lag {}ms",
            self.updates, self.drops, self.errors, self.max_lag_ms
        );
        *self = Self::default();
    }
}

/// Starts the streaming writer. Do not await the returned JoinHandle, as it reconnects forever.
pub fn start_price_stream(cache: Arc<PriceCache>, config: PriceStreamConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let tracked: HashSet<String> =
            config.symbols.iter().map(|s| format!("{}USDT", s.to_ascii_uppercase())).collect();
        let mut consecutive_failures: u32 = 0;
        info!("📈️ Price stream starting for {} symbols", tracked.len());
        loop {
            match connect_async(config.url.as_str()).await {
                Ok((ws, _response)) => {
                    info!("📈️ Price stream connected");
                    consecutive_failures = 0;
                    run_connection(ws, &cache, &tracked).await;
                },
                Err(e) => {
                    warn!("📈️ Price stream connection failed: {e}");
                },
            }
            consecutive_failures = consecutive_failures.saturating_add(1);
            let delay = BACKOFF_BASE
                .saturating_mul(2u32.saturating_pow(consecutive_failures.saturating_sub(1)))
                .min(BACKOFF_CAP);
            warn!("📈️ Reconnecting price stream in {delay:?}");
            tokio::time::sleep(delay).await;
        }
    })
}

async fn run_connection<S>(ws: S, cache: &Arc<PriceCache>, tracked: &HashSet<String>)
where S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Sink<Message> + Unpin {
    let (mut writer, mut reader) = ws.split();
    let mut metrics = WindowMetrics::default();
    let mut window_started = Instant::now();
    loop {
        if window_started.elapsed() >= METRICS_WINDOW {
            metrics.roll();
            window_started = Instant::now();
        }
        let next = tokio::time::timeout(WATCHDOG_TIMEOUT, reader.next()).await;
        match next {
            Err(_) => {
                warn!("📈️ Watchdog: no stream message for {WATCHDOG_TIMEOUT:?}; dropping the connection");
                metrics.roll();
                return;
            },
            Ok(None) => {
                warn!("📈️ Price stream closed by the remote end");
                metrics.roll();
                return;
            },
            Ok(Some(Err(e))) => {
                warn!("📈️ Price stream read error: {e}");
                metrics.errors += 1;
                metrics.roll();
                return;
            },
            Ok(Some(Ok(Message::Ping(payload)))) => {
                if writer.send(Message::Pong(payload)).await.is_err() {
                    warn!("📈️ Could not answer stream ping; dropping the connection");
                    metrics.roll();
                    return;
                }
            },
            Ok(Some(Ok(Message::Text(payload)))) => {
                apply_tickers(payload.as_ref(), cache, tracked, &mut metrics);
            },
            Ok(Some(Ok(_other))) => {},
        }
    }
}

fn apply_tickers(payload: &str, cache: &Arc<PriceCache>, tracked: &HashSet<String>, metrics: &mut WindowMetrics) {
    let tickers: Vec<MiniTicker> = match serde_json::from_str(payload) {
        Ok(t) => t,
        Err(e) => {
            debug!("📈️ Ignoring unparseable stream payload: {e}");
            metrics.errors += 1;
            return;
        },
    };
    let now_ms = Utc::now().timestamp_millis();
    for ticker in tickers {
        if !tracked.contains(&ticker.symbol) {
            continue;
        }
        let lag = now_ms - ticker.event_time_ms;
        metrics.max_lag_ms = metrics.max_lag_ms.max(lag);
        if lag > MAX_EVENT_LAG_MS {
            metrics.drops += 1;
            continue;
        }
        let Ok(price) = ticker.close.parse() else {
            metrics.errors += 1;
            continue;
        };
        let base = ticker.symbol.trim_end_matches("USDT");
        cache.upsert(PriceEntry::ws(base, price));
        metrics.updates += 1;
    }
}

#[cfg(test)]
mod test {
    use rust_decimal_macros::dec;

    use super::*;

    fn tracked() -> HashSet<String> {
        ["BNBUSDT", "ETHUSDT"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fresh_tickers_are_applied() {
        let cache = Arc::new(PriceCache::new());
        let mut metrics = WindowMetrics::default();
        let now = Utc::now().timestamp_millis();
        let payload = format!(
            r#"[{{"s":"BNBUSDT","c":"650.10","E":{now}}},{{"s":"DOGEUSDT","c":"0.1","E":{now}}}]"#
        );
        apply_tickers(&payload, &cache, &tracked(), &mut metrics);
        assert_eq!(cache.get("BNB").unwrap().price_usd, dec!(650.10));
        assert!(cache.get("DOGE").is_none());
        assert_eq!(metrics.updates, 1);
        assert_eq!(metrics.drops, 0);
    }

    #[test]
    fn laggy_tickers_are_dropped() {
        let cache = Arc::new(PriceCache::new());
        let mut metrics = WindowMetrics::default();
        let stale = Utc::now().timestamp_millis() - 10_000;
        let payload = format!(r#"[{{"s":"ETHUSDT","c":"3000","E":{stale}}}]"#);
        apply_tickers(&payload, &cache, &tracked(), &mut metrics);
        assert!(cache.get("ETH").is_none());
        assert_eq!(metrics.drops, 1);
        assert!(metrics.max_lag_ms >= 10_000);
    }

    #[test]
    fn garbage_payload_counts_as_error() {
        let cache = Arc::new(PriceCache::new());
        let mut metrics = WindowMetrics::default();
        apply_tickers("not json", &cache, &tracked(), &mut metrics);
        assert_eq!(metrics.errors, 1);
        assert!(cache.is_empty());
    }
}
