//! Quote math and inventory classification, on a warm cache and a stored FX rate (no network).
use std::sync::Arc;

use rpg_common::Idr;
use rust_decimal_macros::dec;
use rupi_payment_engine::{
    db_types::ExchangeRate,
    kv_store::MemoryKvStore,
    price::{rest::MarketRestClient, PriceCache, PriceEntry, PriceReader},
    test_utils::{
        prepare_env::{prepare_test_env, scratch_db_url},
        seed::*,
    },
    traits::ExchangeRates,
    ExchangeRateApi, QuoteApi, SqliteDatabase,
};

async fn setup(markup: f64, inventory: &str) -> QuoteApi<SqliteDatabase> {
    let url = scratch_db_url();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
    seed_chain(&db, "bsc", 56).await;
    seed_native_token(&db, "bsc", "BNB", markup).await;
    seed_inventory(&db, "bsc", "BNB", inventory).await;
    db.set_exchange_rate(&ExchangeRate::new("USD", dec!(15800))).await.unwrap();

    let cache = Arc::new(PriceCache::new());
    cache.upsert(PriceEntry::ws("BNB", dec!(650.00)));
    let reader = PriceReader::new(cache, Arc::new(MemoryKvStore::new()), MarketRestClient::new(None));
    let rates = ExchangeRateApi::new(db.clone(), None, dec!(15500));
    QuoteApi::new(db, reader, rates)
}

#[tokio::test]
async fn happy_path_bsc_quote() {
    let api = setup(5.0, "10").await;
    let quote = api.quote("bsc", Idr::from(100_000)).await.unwrap();
    assert_eq!(quote.symbol, "BNB");
    assert_eq!(quote.token_price_usd, dec!(650.00));
    assert_eq!(quote.usd_idr_rate, dec!(15800));
    assert_eq!(quote.markup_percent, 5.0);
    // 100000 / 15800 / 650 * 0.95, truncated to 8 decimal places.
    assert_eq!(quote.token_amount.value(), dec!(0.00925024));
    assert_eq!(quote.inventory_status, rupi_payment_engine::engine_api::InventoryStatus::Available);
    // floor(10 * 650 * 15800)
    assert_eq!(quote.max_buy_idr, Idr::from(102_700_000));
    assert!(quote.effective_price_idr.value() > 10_000_000);
}

#[tokio::test]
async fn zero_markup_falls_back_to_the_global_setting() {
    let api = setup(0.0, "10").await;
    let quote = api.quote("bsc", Idr::from(100_000)).await.unwrap();
    // No setting stored: markup defaults to zero and the conversion is pure.
    assert_eq!(quote.markup_percent, 0.0);
    assert_eq!(quote.token_amount.value(), dec!(0.00973709));
}

#[tokio::test]
async fn scarce_inventory_is_limited() {
    let api = setup(5.0, "0.015").await;
    let quote = api.quote("bsc", Idr::from(100_000)).await.unwrap();
    assert_eq!(quote.inventory_status, rupi_payment_engine::engine_api::InventoryStatus::Limited);
}

#[tokio::test]
async fn empty_inventory_is_out_of_stock() {
    let api = setup(5.0, "0.001").await;
    let quote = api.quote("bsc", Idr::from(100_000)).await.unwrap();
    assert_eq!(quote.inventory_status, rupi_payment_engine::engine_api::InventoryStatus::OutOfStock);
}

#[tokio::test]
async fn unknown_chain_is_an_error() {
    let api = setup(5.0, "10").await;
    assert!(api.quote("tron", Idr::from(100_000)).await.is_err());
}
