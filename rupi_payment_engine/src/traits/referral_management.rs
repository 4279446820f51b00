use thiserror::Error;

use crate::db_types::{NewUser, Referral, User};

/// Referral bookkeeping. One referral row per referee, created at registration and never deleted; the two boolean
/// flags (`is_valid`, `reward_given`) only ever move `false -> true`, each behind its own conditional update.
#[allow(async_fn_in_trait)]
pub trait ReferralManagement: Clone + Send + Sync {
    /// Registers a user. When `referral_code_used` resolves to another user, the referral row is created in the
    /// same transaction. The back-reference is set once here and is immutable afterwards.
    async fn create_user(&self, user: NewUser) -> Result<User, ReferralError>;

    async fn fetch_user(&self, user_id: i64) -> Result<Option<User>, ReferralError>;

    async fn fetch_user_by_chat_id(&self, chat_id: &str) -> Result<Option<User>, ReferralError>;

    async fn fetch_referral_for_referee(&self, referee_id: i64) -> Result<Option<Referral>, ReferralError>;

    /// Number of `Success` orders the user has completed. Referral validity is gated on this count.
    async fn count_success_orders(&self, user_id: i64) -> Result<i64, ReferralError>;

    /// The conditional `is_valid false -> true` update, setting `validated_at`. Returns `false` when another caller
    /// validated first.
    async fn mark_referral_valid(&self, referral_id: i64) -> Result<bool, ReferralError>;

    /// The conditional `reward_given false -> true` update, the single atomic "who owns this reward" barrier.
    /// Returns `false` when another caller already granted.
    async fn claim_referral_reward(&self, referral_id: i64) -> Result<bool, ReferralError>;

    /// Total validated referrals credited to a referrer. Milestone bonuses trigger on positive multiples of the
    /// configured threshold.
    async fn count_valid_referrals(&self, referrer_id: i64) -> Result<i64, ReferralError>;

    /// Referrals not yet validated, for the sweep.
    async fn fetch_unvalidated_referrals(&self, limit: i64) -> Result<Vec<Referral>, ReferralError>;
}

#[derive(Debug, Clone, Error)]
pub enum ReferralError {
    #[error("We have an internal database engine error (configuration/uptime etc.): {0}")]
    DatabaseError(String),
    #[error("Referral {0} does not exist")]
    NotFound(i64),
    #[error("User {0} does not exist")]
    UserNotFound(i64),
    #[error("A user with this contact already exists")]
    DuplicateUser,
}

impl From<sqlx::Error> for ReferralError {
    fn from(e: sqlx::Error) -> Self {
        ReferralError::DatabaseError(e.to_string())
    }
}
