//! The per-user conversation state machine backing the interactive checkout flow.
//!
//! State is a serialized blob in the key-value store with a 30-minute TTL, keyed by the chat-platform user id. The
//! flow is a persisted finite-state machine, not in-process continuations: every step transition survives a
//! restart. All writes go through [`ConversationApi::update_state`], which serialises per-user through a short
//! lock; a blob that fails schema validation is discarded and treated as idle.
use std::{future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use rpg_common::TokenAmount;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kv_store::{acquire_lock, KeyValueStore, KvError, LockError, LockOptions};

/// Conversations idle out after this long.
const STATE_TTL: Duration = Duration::from_secs(30 * 60);
/// Per-user write lock.
const STATE_LOCK_TTL: Duration = Duration::from_secs(5);
/// Backoff schedule for the write lock.
const STATE_LOCK_BACKOFF: [Duration; 3] =
    [Duration::from_millis(50), Duration::from_millis(100), Duration::from_millis(150)];
/// The buy-flow critical section guard.
const CREATE_ORDER_LOCK_TTL: Duration = Duration::from_secs(30);

/// Maximum tolerated drift between the pinned quote and the fresh quote at order creation.
pub const SLIPPAGE_TOLERANCE_PERCENT: i64 = 5;

#[derive(Debug, Clone, Error)]
pub enum ConversationError {
    #[error("Another operation is in progress for this user; try again in a moment")]
    Busy,
    #[error("The price moved more than {SLIPPAGE_TOLERANCE_PERCENT}% since confirmation; please re-quote")]
    PriceMoved,
    #[error("Key-value store error: {0}")]
    Store(String),
}

impl From<KvError> for ConversationError {
    fn from(e: KvError) -> Self {
        ConversationError::Store(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStep {
    #[default]
    Idle,
    AwaitingChain,
    AwaitingAmount,
    AwaitingCustomAmount,
    AwaitingWallet,
    AwaitingVoucher,
    AwaitingConfirmation,
    AwaitingPaymentMethod,
    AwaitingAuthOtp,
    AwaitingLinkCode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConversationState {
    pub step: ConversationStep,
    pub chain: Option<String>,
    pub amount_idr: Option<i64>,
    /// Pinned at confirmation time for the slippage guard.
    pub token_amount: Option<TokenAmount>,
    pub wallet_address: Option<String>,
    pub voucher_code: Option<String>,
    pub order_id: Option<String>,
    pub session_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self {
            step: ConversationStep::Idle,
            chain: None,
            amount_idr: None,
            token_amount: None,
            wallet_address: None,
            voucher_code: None,
            order_id: None,
            session_token: None,
            created_at: Utc::now(),
        }
    }
}

impl ConversationState {
    fn expired(&self) -> bool {
        self.step != ConversationStep::Idle && Utc::now() - self.created_at > chrono::Duration::minutes(30)
    }
}

#[derive(Clone)]
pub struct ConversationApi {
    kv: Arc<dyn KeyValueStore>,
}

impl ConversationApi {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    fn state_key(chat_id: &str) -> String {
        format!("conv:{chat_id}")
    }

    /// Current state for the user. Missing, unreadable and over-age blobs all come back as a fresh idle state.
    pub async fn get_state(&self, chat_id: &str) -> Result<ConversationState, ConversationError> {
        let Some(raw) = self.kv.get(&Self::state_key(chat_id)).await? else {
            return Ok(ConversationState::default());
        };
        let state: ConversationState = match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(e) => {
                warn!("💬️ Discarding malformed conversation blob for {chat_id}: {e}");
                return Ok(ConversationState::default());
            },
        };
        if state.expired() {
            debug!("💬️ Conversation for {chat_id} aged out; resetting to idle");
            return Ok(ConversationState::default());
        }
        Ok(state)
    }

    /// Read-merge-write under the per-user lock. The mutator sees the current state and edits it in place.
    pub async fn update_state<F>(&self, chat_id: &str, mutate: F) -> Result<ConversationState, ConversationError>
    where F: FnOnce(&mut ConversationState) {
        let lock = self.acquire_state_lock(chat_id).await?;
        let result = async {
            let mut state = self.get_state(chat_id).await?;
            mutate(&mut state);
            let raw = serde_json::to_string(&state).map_err(|e| ConversationError::Store(e.to_string()))?;
            self.kv.put(&Self::state_key(chat_id), &raw, Some(STATE_TTL)).await?;
            Ok(state)
        }
        .await;
        lock.release(self.kv.as_ref()).await;
        result
    }

    /// Reset to idle: on `/start`, on flow completion and on error.
    pub async fn reset(&self, chat_id: &str) -> Result<ConversationState, ConversationError> {
        self.update_state(chat_id, |state| *state = ConversationState::default()).await
    }

    /// Run `f` inside the per-user buy-flow critical section. The caller must re-check "has pending order" inside
    /// `f`; this guard only guarantees that at most one buy flow per user is past confirmation at a time.
    pub async fn with_create_order_guard<F, Fut, T>(&self, user_id: i64, f: F) -> Result<T, ConversationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let key = format!("lock:create_order:{user_id}");
        let lock = acquire_lock(self.kv.as_ref(), &key, LockOptions::try_once(CREATE_ORDER_LOCK_TTL))
            .await
            .map_err(|e| match e {
                LockError::Acquisition(_) => ConversationError::Busy,
                LockError::Backend(msg) => ConversationError::Store(msg),
            })?;
        let result = f().await;
        lock.release(self.kv.as_ref()).await;
        Ok(result)
    }

    async fn acquire_state_lock(
        &self,
        chat_id: &str,
    ) -> Result<crate::kv_store::LockHandle, ConversationError> {
        let key = format!("lock:conv:{chat_id}");
        for (attempt, backoff) in STATE_LOCK_BACKOFF.iter().enumerate() {
            match acquire_lock(self.kv.as_ref(), &key, LockOptions::try_once(STATE_LOCK_TTL)).await {
                Ok(lock) => return Ok(lock),
                Err(LockError::Acquisition(_)) => {
                    debug!("💬️ Conversation lock for {chat_id} busy (attempt {})", attempt + 1);
                    tokio::time::sleep(*backoff).await;
                },
                Err(LockError::Backend(msg)) => return Err(ConversationError::Store(msg)),
            }
        }
        Err(ConversationError::Busy)
    }
}

/// The slippage guard: compares the pinned confirmation-time amount with a fresh quote.
pub fn check_slippage(pinned: TokenAmount, current: TokenAmount) -> Result<(), ConversationError> {
    if pinned.is_zero() {
        return Err(ConversationError::PriceMoved);
    }
    let drift = (current.value() - pinned.value()).abs() / pinned.value() * Decimal::ONE_HUNDRED;
    if drift > Decimal::from(SLIPPAGE_TOLERANCE_PERCENT) {
        return Err(ConversationError::PriceMoved);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::kv_store::MemoryKvStore;

    fn api() -> ConversationApi {
        ConversationApi::new(Arc::new(MemoryKvStore::new()))
    }

    #[tokio::test]
    async fn unknown_user_is_idle() {
        let api = api();
        let state = api.get_state("12345").await.unwrap();
        assert_eq!(state.step, ConversationStep::Idle);
    }

    #[tokio::test]
    async fn update_roundtrips() {
        let api = api();
        api.update_state("7", |s| {
            s.step = ConversationStep::AwaitingWallet;
            s.chain = Some("bsc".into());
            s.amount_idr = Some(100_000);
        })
        .await
        .unwrap();
        let state = api.get_state("7").await.unwrap();
        assert_eq!(state.step, ConversationStep::AwaitingWallet);
        assert_eq!(state.chain.as_deref(), Some("bsc"));
        assert_eq!(state.amount_idr, Some(100_000));
    }

    #[tokio::test]
    async fn malformed_blob_resets_to_idle() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.put("conv:9", "{\"step\":\"no_such_step\"}", None).await.unwrap();
        let api = ConversationApi::new(kv);
        let state = api.get_state("9").await.unwrap();
        assert_eq!(state.step, ConversationStep::Idle);
    }

    #[tokio::test]
    async fn aged_conversation_resets() {
        let api = api();
        api.update_state("8", |s| {
            s.step = ConversationStep::AwaitingAmount;
            s.created_at = Utc::now() - chrono::Duration::minutes(45);
        })
        .await
        .unwrap();
        let state = api.get_state("8").await.unwrap();
        assert_eq!(state.step, ConversationStep::Idle);
    }

    #[tokio::test]
    async fn create_order_guard_is_exclusive() {
        let api = api();
        let api2 = api.clone();
        let result = api
            .with_create_order_guard(1, || async move {
                // A nested attempt for the same user must be refused while the guard is held.
                let nested = api2.with_create_order_guard(1, || async { 0 }).await;
                assert!(matches!(nested, Err(ConversationError::Busy)));
                42
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
        // After release, the guard is available again.
        let after = api.with_create_order_guard(1, || async { 1 }).await.unwrap();
        assert_eq!(after, 1);
    }

    #[test]
    fn slippage_guard() {
        let pinned = TokenAmount::from(dec!(0.010000));
        assert!(check_slippage(pinned, TokenAmount::from(dec!(0.0102))).is_ok());
        assert!(check_slippage(pinned, TokenAmount::from(dec!(0.0095))).is_ok());
        assert!(matches!(
            check_slippage(pinned, TokenAmount::from(dec!(0.0106))),
            Err(ConversationError::PriceMoved)
        ));
        assert!(matches!(
            check_slippage(pinned, TokenAmount::from(dec!(0.0094))),
            Err(ConversationError::PriceMoved)
        ));
    }
}
