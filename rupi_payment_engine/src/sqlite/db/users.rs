use rand::{distributions::Alphanumeric, Rng};
use sqlx::SqliteConnection;

use crate::{db_types::User, traits::ReferralError};

/// Generates an 8-character uppercase referral code.
pub fn random_referral_code() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(8).map(|c| (c as char).to_ascii_uppercase()).collect()
}

pub async fn insert(
    email: Option<&str>,
    chat_id: Option<&str>,
    referral_code: &str,
    referred_by: Option<i64>,
    conn: &mut SqliteConnection,
) -> Result<User, ReferralError> {
    let user = sqlx::query_as(
        "INSERT INTO users (email, chat_id, referral_code, referred_by) VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(email)
    .bind(chat_id)
    .bind(referral_code)
    .bind(referred_by)
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => ReferralError::DuplicateUser,
        other => ReferralError::DatabaseError(other.to_string()),
    })?;
    Ok(user)
}

pub async fn fetch_by_id(user_id: i64, conn: &mut SqliteConnection) -> Result<Option<User>, sqlx::Error> {
    let user = sqlx::query_as("SELECT * FROM users WHERE id = $1").bind(user_id).fetch_optional(conn).await?;
    Ok(user)
}

pub async fn fetch_by_chat_id(chat_id: &str, conn: &mut SqliteConnection) -> Result<Option<User>, sqlx::Error> {
    let user = sqlx::query_as("SELECT * FROM users WHERE chat_id = $1").bind(chat_id).fetch_optional(conn).await?;
    Ok(user)
}

pub async fn fetch_by_referral_code(code: &str, conn: &mut SqliteConnection) -> Result<Option<User>, sqlx::Error> {
    let user = sqlx::query_as("SELECT * FROM users WHERE referral_code = $1").bind(code).fetch_optional(conn).await?;
    Ok(user)
}
