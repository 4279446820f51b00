use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::SqliteConnection;

use crate::{db_types::ExchangeRate, traits::ExchangeRateError};

pub async fn fetch_last_rate(
    base_currency: &str,
    conn: &mut SqliteConnection,
) -> Result<ExchangeRate, ExchangeRateError> {
    let row: Option<(String, String, DateTime<Utc>)> = sqlx::query_as(
        "SELECT base_currency, rate, updated_at FROM exchange_rates WHERE base_currency = $1 ORDER BY updated_at \
         DESC, id DESC LIMIT 1",
    )
    .bind(base_currency)
    .fetch_optional(conn)
    .await?;
    let (base_currency, raw_rate, updated_at) =
        row.ok_or_else(|| ExchangeRateError::RateDoesNotExist(base_currency.to_string()))?;
    let rate = Decimal::from_str(&raw_rate).map_err(|_| ExchangeRateError::MalformedRate(raw_rate))?;
    Ok(ExchangeRate { base_currency, rate, updated_at })
}

pub async fn set_exchange_rate(rate: &ExchangeRate, conn: &mut SqliteConnection) -> Result<(), ExchangeRateError> {
    sqlx::query("INSERT INTO exchange_rates (base_currency, rate) VALUES ($1, $2)")
        .bind(&rate.base_currency)
        .bind(rate.rate.to_string())
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn fetch_setting(key: &str, conn: &mut SqliteConnection) -> Result<Option<String>, ExchangeRateError> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT value FROM settings WHERE key = $1").bind(key).fetch_optional(conn).await?;
    Ok(row.map(|(value,)| value))
}

pub async fn set_setting(key: &str, value: &str, conn: &mut SqliteConnection) -> Result<(), ExchangeRateError> {
    sqlx::query(
        "INSERT INTO settings (key, value, updated_at) VALUES ($1, $2, CURRENT_TIMESTAMP) ON CONFLICT (key) DO \
         UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(key)
    .bind(value)
    .execute(conn)
    .await?;
    Ok(())
}
