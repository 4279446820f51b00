//! Volatile key-value storage and the distributed locks built on it.
//!
//! Locks, conversation state and rate-limit windows live in a key-value space with TTLs, not in the relational
//! store. [`KeyValueStore`] is the seam: the in-process [`MemoryKvStore`] backs single-node deployments and every
//! test, and a networked store implements the same five primitives for multi-node setups.
//!
//! The lock discipline is the classic set-if-absent pattern: a random owner token is written with a TTL, and
//! release is a compare-and-delete on that token so an expired-and-reacquired lock can never be deleted by the old
//! owner.
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, warn};
use rand::RngCore;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Clone, Error)]
pub enum KvError {
    #[error("Key-value store error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Error)]
pub enum LockError {
    #[error("Could not acquire lock '{0}' within the retry budget")]
    Acquisition(String),
    #[error("Key-value store error: {0}")]
    Backend(String),
}

impl From<KvError> for LockError {
    fn from(e: KvError) -> Self {
        LockError::Backend(e.to_string())
    }
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError>;

    /// Set `key` to `value` with a TTL only if the key is absent. Returns `true` when this call created the key.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError>;

    /// Delete `key` only if it currently holds `expected`. Returns `true` when a deletion happened.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, KvError>;

    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// Increment the counter at `key`, creating it with the TTL when absent. Returns the post-increment value.
    /// Used for fixed-window rate limiting.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, KvError>;
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        match self.expires_at {
            Some(deadline) => Instant::now() < deadline,
            None => true,
        }
    }
}

/// In-process store over a concurrent map with lazy expiry.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, Entry>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        if let Some(entry) = self.entries.get(key) {
            if entry.live() {
                return Ok(Some(entry.value.clone()));
            }
        }
        self.entries.remove_if(key, |_, e| !e.live());
        Ok(None)
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        let expires_at = ttl.map(|t| Instant::now() + t);
        self.entries.insert(key.to_string(), Entry { value: value.to_string(), expires_at });
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut created = false;
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| {
            created = true;
            Entry { value: value.to_string(), expires_at: Some(Instant::now() + ttl) }
        });
        if !created && !entry.live() {
            // The previous holder's TTL lapsed; take over the slot.
            *entry.value_mut() = Entry { value: value.to_string(), expires_at: Some(Instant::now() + ttl) };
            created = true;
        }
        Ok(created)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, KvError> {
        let removed = self.entries.remove_if(key, |_, e| e.live() && e.value == expected);
        Ok(removed.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, KvError> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry { value: "0".to_string(), expires_at: Some(Instant::now() + ttl) });
        if !entry.live() {
            *entry.value_mut() = Entry { value: "0".to_string(), expires_at: Some(Instant::now() + ttl) };
        }
        let current: i64 = entry.value.parse().unwrap_or(0);
        let next = current + 1;
        entry.value_mut().value = next.to_string();
        Ok(next)
    }
}

/// How a lock acquisition should behave while the lock is contended.
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// How long the lock lives if the owner never releases it.
    pub ttl: Duration,
    /// Number of acquisition attempts before giving up.
    pub attempts: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
    /// Hard wall-clock cap over all attempts.
    pub hard_cap: Option<Duration>,
}

impl LockOptions {
    /// The per-chain payout mutex: TTL 180 s, 30 attempts at 1 s intervals, 35 s hard cap.
    pub fn chain_send() -> Self {
        Self {
            ttl: Duration::from_secs(180),
            attempts: 30,
            retry_delay: Duration::from_secs(1),
            hard_cap: Some(Duration::from_secs(35)),
        }
    }

    /// Single immediate attempt; used for SWR refresh guards.
    pub fn try_once(ttl: Duration) -> Self {
        Self { ttl, attempts: 1, retry_delay: Duration::ZERO, hard_cap: None }
    }
}

/// A held lock. Release is explicit (the compare-and-delete needs the store); dropping a handle without releasing
/// simply lets the TTL clean up.
#[derive(Debug)]
pub struct LockHandle {
    key: String,
    token: String,
}

impl LockHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn release(self, kv: &dyn KeyValueStore) {
        match kv.compare_and_delete(&self.key, &self.token).await {
            Ok(true) => debug!("🔐️ Lock '{}' released", self.key),
            Ok(false) => {
                warn!("🔐️ Lock '{}' was not ours to release (TTL lapsed and another owner took it)", self.key)
            },
            Err(e) => warn!("🔐️ Error releasing lock '{}': {e}", self.key),
        }
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Acquire the named lock, retrying per `options`.
pub async fn acquire_lock(
    kv: &dyn KeyValueStore,
    key: &str,
    options: LockOptions,
) -> Result<LockHandle, LockError> {
    let token = random_token();
    let started = Instant::now();
    for attempt in 0..options.attempts {
        if let Some(cap) = options.hard_cap {
            if started.elapsed() >= cap {
                break;
            }
        }
        if kv.set_nx(key, &token, options.ttl).await? {
            debug!("🔐️ Lock '{key}' acquired on attempt {}", attempt + 1);
            return Ok(LockHandle { key: key.to_string(), token });
        }
        if attempt + 1 < options.attempts && !options.retry_delay.is_zero() {
            tokio::time::sleep(options.retry_delay).await;
        }
    }
    Err(LockError::Acquisition(key.to_string()))
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn set_nx_is_exclusive_until_ttl() {
        let kv = MemoryKvStore::new();
        assert!(kv.set_nx("k", "a", Duration::from_millis(50)).await.unwrap());
        assert!(!kv.set_nx("k", "b", Duration::from_millis(50)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(kv.set_nx("k", "b", Duration::from_millis(50)).await.unwrap());
    }

    #[tokio::test]
    async fn compare_and_delete_requires_matching_token() {
        let kv = MemoryKvStore::new();
        kv.put("k", "owner-1", None).await.unwrap();
        assert!(!kv.compare_and_delete("k", "owner-2").await.unwrap());
        assert!(kv.compare_and_delete("k", "owner-1").await.unwrap());
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_values_read_as_absent() {
        let kv = MemoryKvStore::new();
        kv.put("k", "v", Some(Duration::from_millis(30))).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v"));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incr_counts_within_window() {
        let kv = MemoryKvStore::new();
        assert_eq!(kv.incr("w", Duration::from_secs(60)).await.unwrap(), 1);
        assert_eq!(kv.incr("w", Duration::from_secs(60)).await.unwrap(), 2);
        assert_eq!(kv.incr("w", Duration::from_secs(60)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn stale_lock_cannot_be_released_by_old_owner() {
        let kv = Arc::new(MemoryKvStore::new());
        let lock =
            acquire_lock(kv.as_ref(), "lock:chain:bsc", LockOptions::try_once(Duration::from_millis(30))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        // TTL lapsed; a second worker takes the lock.
        let second =
            acquire_lock(kv.as_ref(), "lock:chain:bsc", LockOptions::try_once(Duration::from_secs(10))).await.unwrap();
        // The first owner's release must not evict the second owner.
        lock.release(kv.as_ref()).await;
        assert!(kv.get("lock:chain:bsc").await.unwrap().is_some());
        second.release(kv.as_ref()).await;
        assert!(kv.get("lock:chain:bsc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn acquisition_fails_after_attempts() {
        let kv = MemoryKvStore::new();
        let _held = acquire_lock(&kv, "busy", LockOptions::try_once(Duration::from_secs(10))).await.unwrap();
        let opts = LockOptions {
            ttl: Duration::from_secs(10),
            attempts: 3,
            retry_delay: Duration::from_millis(10),
            hard_cap: None,
        };
        let result = acquire_lock(&kv, "busy", opts).await;
        assert!(matches!(result, Err(LockError::Acquisition(_))));
    }
}
