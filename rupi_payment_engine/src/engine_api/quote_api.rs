//! Buy quotes: joins the live price, the USD/IDR rate, the per-token markup and inventory availability.
use log::debug;
use rpg_common::{Idr, TokenAmount};
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use serde::Serialize;
use thiserror::Error;

use crate::{
    engine_api::ExchangeRateApi,
    price::{PriceError, PriceReader},
    traits::{
        CatalogError, CatalogManagement, ExchangeRateError, ExchangeRates, InventoryError, InventoryManagement,
        SettingsManagement,
    },
};

/// Token amounts are quoted to this many decimal places, rounded toward zero so the user can never be quoted more
/// than the conversion yields.
const QUOTE_PRECISION: u32 = 8;
/// Settings key for the global markup applied when a token has none of its own.
pub const DEFAULT_MARKUP_SETTING: &str = "default_markup_percent";

#[derive(Debug, Clone, Error)]
pub enum QuoteError {
    #[error("{0}")]
    Catalog(#[from] CatalogError),
    #[error("{0}")]
    Price(#[from] PriceError),
    #[error("{0}")]
    Rate(#[from] ExchangeRateError),
    #[error("{0}")]
    Inventory(#[from] InventoryError),
    #[error("A market rate of zero cannot be quoted")]
    DegenerateRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InventoryStatus {
    Available,
    Limited,
    OutOfStock,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub chain: String,
    pub symbol: String,
    pub token_amount: TokenAmount,
    pub token_price_usd: Decimal,
    pub usd_idr_rate: Decimal,
    pub markup_percent: f64,
    /// IDR the user effectively pays per whole token, markup included.
    pub effective_price_idr: Idr,
    pub inventory_status: InventoryStatus,
    /// The largest order the current sellable inventory supports.
    pub max_buy_idr: Idr,
}

pub struct QuoteApi<B> {
    db: B,
    prices: PriceReader,
    rates: ExchangeRateApi<B>,
}

impl<B> QuoteApi<B>
where B: CatalogManagement + InventoryManagement + ExchangeRates + SettingsManagement
{
    pub fn new(db: B, prices: PriceReader, rates: ExchangeRateApi<B>) -> Self {
        Self { db, prices, rates }
    }

    /// Quote how much native token `amount_idr` buys on `chain`.
    pub async fn quote(&self, chain_slug: &str, amount_idr: Idr) -> Result<Quote, QuoteError> {
        let token = self
            .db
            .fetch_native_token(chain_slug)
            .await?
            .ok_or_else(|| CatalogError::NoNativeToken(chain_slug.to_string()))?;

        let (price, fx_rate, inventory) = tokio::join!(
            self.prices.price_usd(&token.symbol),
            self.rates.usd_idr(),
            self.db.fetch_inventory(chain_slug, &token.symbol),
        );
        let price = price?;
        let fx_rate = fx_rate?;
        let inventory = inventory?;
        if price.is_zero() || fx_rate.is_zero() {
            return Err(QuoteError::DegenerateRate);
        }

        let markup_percent = if token.markup_percent > 0.0 {
            token.markup_percent
        } else {
            self.default_markup().await?
        };
        let markup = Decimal::try_from(markup_percent).unwrap_or_default();

        let amount = Decimal::from(amount_idr.value());
        let gross = amount / fx_rate / price;
        let net = gross * (Decimal::ONE - markup / Decimal::ONE_HUNDRED);
        let token_amount =
            TokenAmount::from(net.round_dp_with_strategy(QUOTE_PRECISION, RoundingStrategy::ToZero));

        let available = inventory.as_ref().map(|i| i.available()).unwrap_or_else(TokenAmount::zero);
        let inventory_status = if token_amount > available || token_amount.is_zero() {
            InventoryStatus::OutOfStock
        } else if available < TokenAmount::from(token_amount.value() * Decimal::TWO) {
            InventoryStatus::Limited
        } else {
            InventoryStatus::Available
        };

        let effective_price_idr = if token_amount.is_zero() {
            Idr::zero()
        } else {
            Idr::from((amount / token_amount.value()).trunc().to_i64().unwrap_or(i64::MAX))
        };
        let max_buy_idr =
            Idr::from((available.value() * price * fx_rate).trunc().to_i64().unwrap_or(i64::MAX));

        debug!(
            "📈️ Quote {chain_slug}/{}: {amount_idr} -> {token_amount} (price {price}, fx {fx_rate}, markup \
             {markup_percent}%) [{inventory_status:?}]",
            token.symbol
        );
        Ok(Quote {
            chain: chain_slug.to_string(),
            symbol: token.symbol,
            token_amount,
            token_price_usd: price,
            usd_idr_rate: fx_rate,
            markup_percent,
            effective_price_idr,
            inventory_status,
            max_buy_idr,
        })
    }

    async fn default_markup(&self) -> Result<f64, QuoteError> {
        let raw = self.db.fetch_setting(DEFAULT_MARKUP_SETTING).await?;
        Ok(raw.and_then(|v| v.parse().ok()).unwrap_or(0.0))
    }
}
