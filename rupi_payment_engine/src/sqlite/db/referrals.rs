use sqlx::SqliteConnection;

use crate::{db_types::Referral, traits::ReferralError};

pub async fn insert(
    referrer_id: i64,
    referee_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Referral, ReferralError> {
    let referral = sqlx::query_as("INSERT INTO referrals (referrer_id, referee_id) VALUES ($1, $2) RETURNING *")
        .bind(referrer_id)
        .bind(referee_id)
        .fetch_one(conn)
        .await?;
    Ok(referral)
}

pub async fn fetch_by_id(id: i64, conn: &mut SqliteConnection) -> Result<Option<Referral>, sqlx::Error> {
    let referral = sqlx::query_as("SELECT * FROM referrals WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(referral)
}

pub async fn fetch_for_referee(
    referee_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<Referral>, sqlx::Error> {
    let referral =
        sqlx::query_as("SELECT * FROM referrals WHERE referee_id = $1").bind(referee_id).fetch_optional(conn).await?;
    Ok(referral)
}

/// Conditional `is_valid false -> true`, stamping `validated_at`. Zero rows means another caller validated first.
pub async fn mark_valid(referral_id: i64, conn: &mut SqliteConnection) -> Result<bool, ReferralError> {
    let updated = sqlx::query(
        "UPDATE referrals SET is_valid = 1, validated_at = CURRENT_TIMESTAMP WHERE id = $1 AND is_valid = 0",
    )
    .bind(referral_id)
    .execute(conn)
    .await?;
    Ok(updated.rows_affected() == 1)
}

/// The single "who owns this reward" barrier: conditional `reward_given false -> true`. Exactly one caller can ever
/// count a row here.
pub async fn claim_reward(referral_id: i64, conn: &mut SqliteConnection) -> Result<bool, ReferralError> {
    let updated = sqlx::query("UPDATE referrals SET reward_given = 1 WHERE id = $1 AND reward_given = 0")
        .bind(referral_id)
        .execute(conn)
        .await?;
    Ok(updated.rows_affected() == 1)
}

pub async fn count_valid_for_referrer(referrer_id: i64, conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM referrals WHERE referrer_id = $1 AND is_valid = 1")
            .bind(referrer_id)
            .fetch_one(conn)
            .await?;
    Ok(count)
}

pub async fn fetch_unvalidated(limit: i64, conn: &mut SqliteConnection) -> Result<Vec<Referral>, sqlx::Error> {
    let referrals = sqlx::query_as("SELECT * FROM referrals WHERE is_valid = 0 ORDER BY created_at ASC LIMIT $1")
        .bind(limit)
        .fetch_all(conn)
        .await?;
    Ok(referrals)
}
