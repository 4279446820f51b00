use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;

/// Entries older than this are treated as absent regardless of staleness handling.
pub const HARD_TTL: Duration = Duration::hours(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    /// Live mini-ticker stream.
    Ws,
    /// REST snapshot or single-symbol refresh.
    Rest,
}

#[derive(Debug, Clone)]
pub struct PriceEntry {
    pub symbol: String,
    pub price_usd: Decimal,
    pub ts: DateTime<Utc>,
    pub source: PriceSource,
}

impl PriceEntry {
    pub fn ws(symbol: &str, price_usd: Decimal) -> Self {
        Self { symbol: symbol.to_string(), price_usd, ts: Utc::now(), source: PriceSource::Ws }
    }

    pub fn rest(symbol: &str, price_usd: Decimal) -> Self {
        Self { symbol: symbol.to_string(), price_usd, ts: Utc::now(), source: PriceSource::Rest }
    }
}

/// Per-symbol price table shared by both writers and every reader.
#[derive(Default)]
pub struct PriceCache {
    entries: DashMap<String, PriceEntry>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, entry: PriceEntry) {
        self.entries.insert(entry.symbol.clone(), entry);
    }

    /// The entry for `symbol`, unless it has passed the hard TTL (then it is evicted and `None` is returned).
    pub fn get(&self, symbol: &str) -> Option<PriceEntry> {
        let entry = self.entries.get(symbol)?.clone();
        if Utc::now() - entry.ts > HARD_TTL {
            drop(self.entries.remove(symbol));
            return None;
        }
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod test {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn upsert_and_get() {
        let cache = PriceCache::new();
        cache.upsert(PriceEntry::ws("BNB", dec!(650.0)));
        let entry = cache.get("BNB").unwrap();
        assert_eq!(entry.price_usd, dec!(650.0));
        assert_eq!(entry.source, PriceSource::Ws);
        assert!(cache.get("ETH").is_none());
    }

    #[test]
    fn hard_ttl_evicts() {
        let cache = PriceCache::new();
        let mut entry = PriceEntry::rest("ETH", dec!(3000));
        entry.ts = Utc::now() - Duration::hours(2);
        cache.upsert(entry);
        assert!(cache.get("ETH").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn newer_source_wins() {
        let cache = PriceCache::new();
        cache.upsert(PriceEntry::rest("POL", dec!(0.40)));
        cache.upsert(PriceEntry::ws("POL", dec!(0.41)));
        let entry = cache.get("POL").unwrap();
        assert_eq!(entry.price_usd, dec!(0.41));
        assert_eq!(entry.source, PriceSource::Ws);
    }
}
