//! Referral validation and reward granting.
//!
//! Validation runs on referee order success, on the ten-minute sweep and on login of a user with a pending
//! referral, and all three paths converge on [`ReferralApi::validate`], which is idempotent. Reward ownership is the
//! single conditional `reward_given false -> true` update; whoever counts that row creates the vouchers.
use chrono::{Duration, Utc};
use log::*;
use rpg_common::Idr;
use thiserror::Error;

use crate::{
    db_types::{NewVoucher, Voucher},
    events::{EventProducers, ReferralRewardEvent},
    traits::{ExchangeRateError, ReferralError, ReferralManagement, SettingsManagement, VoucherError, VoucherManagement},
};

/// Successful referee orders required before a referral validates.
const DEFAULT_VALIDATION_THRESHOLD: i64 = 1;
/// Every this-many valid referrals earns the referrer a milestone bonus.
const MILESTONE_EVERY: i64 = 20;
const REWARD_EXPIRY_DAYS: i64 = 90;
const BONUS_EXPIRY_DAYS: i64 = 30;
const DEFAULT_REWARD_IDR: i64 = 25_000;
const DEFAULT_BONUS_IDR: i64 = 100_000;

pub const REWARD_VALUE_SETTING: &str = "referral_reward_idr";
pub const BONUS_VALUE_SETTING: &str = "referral_bonus_idr";
pub const THRESHOLD_SETTING: &str = "referral_min_success_orders";

#[derive(Debug, Error)]
pub enum ReferralApiError {
    #[error("{0}")]
    Referral(#[from] ReferralError),
    #[error("{0}")]
    Voucher(#[from] VoucherError),
    #[error("{0}")]
    Settings(#[from] ExchangeRateError),
}

pub struct ReferralApi<B> {
    db: B,
    producers: EventProducers,
}

impl<B> ReferralApi<B>
where B: ReferralManagement + VoucherManagement + SettingsManagement
{
    pub fn new(db: B, producers: EventProducers) -> Self {
        Self { db, producers }
    }

    /// Validate the referral of `referee_id`, granting the reward when it newly qualifies.
    ///
    /// Safe to call any number of times from any trigger; a fully processed referral returns immediately.
    pub async fn validate(&self, referee_id: i64) -> Result<Option<Voucher>, ReferralApiError> {
        let Some(referral) = self.db.fetch_referral_for_referee(referee_id).await? else {
            return Ok(None);
        };
        if referral.is_valid && referral.reward_given {
            return Ok(None);
        }
        let threshold = self.setting_i64(THRESHOLD_SETTING, DEFAULT_VALIDATION_THRESHOLD).await?;
        let completed = self.db.count_success_orders(referee_id).await?;
        if completed < threshold {
            trace!("🤝️ Referee {referee_id} has {completed}/{threshold} successful orders; not yet valid");
            return Ok(None);
        }
        if !referral.is_valid && self.db.mark_referral_valid(referral.id).await? {
            info!("🤝️ Referral {} validated (referee {referee_id})", referral.id);
        }
        self.grant(referral.id, referral.referrer_id).await
    }

    /// Grant the reward for a validated referral. The `reward_given` barrier guarantees a single grant no matter
    /// how many workers race here.
    pub async fn grant(&self, referral_id: i64, referrer_id: i64) -> Result<Option<Voucher>, ReferralApiError> {
        if !self.db.claim_referral_reward(referral_id).await? {
            trace!("🤝️ Reward for referral {referral_id} already granted elsewhere");
            return Ok(None);
        }
        let value = Idr::from(self.setting_i64(REWARD_VALUE_SETTING, DEFAULT_REWARD_IDR).await?);
        let voucher = self
            .db
            .create_voucher(NewVoucher {
                code: reward_code("REF"),
                owner_user_id: Some(referrer_id),
                value,
                min_amount: Idr::zero(),
                max_usage: 1,
                expires_at: Utc::now() + Duration::days(REWARD_EXPIRY_DAYS),
            })
            .await?;
        info!("🤝️ Referral reward {} granted to user {referrer_id}", voucher.code);
        for producer in &self.producers.referral_reward_producer {
            producer
                .publish_event(ReferralRewardEvent {
                    referrer_id,
                    voucher_code: voucher.code.clone(),
                    milestone: false,
                })
                .await;
        }

        let valid_count = self.db.count_valid_referrals(referrer_id).await?;
        if valid_count > 0 && valid_count % MILESTONE_EVERY == 0 {
            let bonus_value = Idr::from(self.setting_i64(BONUS_VALUE_SETTING, DEFAULT_BONUS_IDR).await?);
            let bonus = self
                .db
                .create_voucher(NewVoucher {
                    code: reward_code("BONUS"),
                    owner_user_id: Some(referrer_id),
                    value: bonus_value,
                    min_amount: Idr::zero(),
                    max_usage: 1,
                    expires_at: Utc::now() + Duration::days(BONUS_EXPIRY_DAYS),
                })
                .await?;
            info!("🤝️ Milestone bonus {} granted to user {referrer_id} ({valid_count} valid referrals)", bonus.code);
            for producer in &self.producers.referral_reward_producer {
                producer
                    .publish_event(ReferralRewardEvent {
                        referrer_id,
                        voucher_code: bonus.code.clone(),
                        milestone: true,
                    })
                    .await;
            }
        }
        Ok(Some(voucher))
    }

    /// The ten-minute sweep over unvalidated referrals.
    pub async fn sweep(&self, batch_size: i64) -> Result<usize, ReferralApiError> {
        let pending = self.db.fetch_unvalidated_referrals(batch_size).await?;
        let mut granted = 0;
        for referral in pending {
            match self.validate(referral.referee_id).await {
                Ok(Some(_)) => granted += 1,
                Ok(None) => {},
                Err(e) => warn!("🤝️ Sweep could not validate referral {}: {e}", referral.id),
            }
        }
        Ok(granted)
    }

    /// Login hook: revisit the user's own pending referral.
    pub async fn on_login(&self, user_id: i64) -> Result<(), ReferralApiError> {
        if let Err(e) = self.validate(user_id).await {
            warn!("🤝️ Login-triggered referral validation for {user_id} failed: {e}");
        }
        Ok(())
    }

    async fn setting_i64(&self, key: &str, default: i64) -> Result<i64, ReferralApiError> {
        let raw = self.db.fetch_setting(key).await?;
        Ok(raw.and_then(|v| v.parse().ok()).unwrap_or(default))
    }
}

fn reward_code(prefix: &str) -> String {
    format!("{prefix}-{}", &uuid::Uuid::new_v4().simple().to_string()[..10].to_ascii_uppercase())
}
