//! HTTP-level webhook reconciliation: signatures, idempotence, fraud handling.
use std::sync::Arc;

use actix_web::{test, web, App};
use rpg_common::{Idr, Secret};
use rupi_payment_engine::{
    db_types::{NewOrder, Order, OrderId, OrderStatusType, PaymentMethod},
    events::EventProducers,
    kv_store::MemoryKvStore,
    price::{rest::MarketRestClient, PriceCache, PriceReader},
    test_utils::{
        mocks::MockProvider,
        prepare_env::{prepare_test_env, scratch_db_url},
        seed::*,
    },
    traits::PaymentGatewayDatabase,
    ExchangeRateApi, OrderFlowApi, PayoutQueue, QuoteApi, SqliteDatabase,
};
use rupi_payment_server::{server::AppState, webhook::payment_webhook};
use rust_decimal_macros::dec;
use serde_json::json;
use tokio::sync::mpsc;

const WALLET: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
const SERVER_KEY: &str = "test-server-key";

async fn setup() -> (SqliteDatabase, web::Data<AppState>, mpsc::Receiver<OrderId>) {
    let url = scratch_db_url();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
    seed_chain(&db, "bsc", 56).await;
    seed_native_token(&db, "bsc", "BNB", 5.0).await;
    seed_inventory(&db, "bsc", "BNB", "10").await;

    let kv = Arc::new(MemoryKvStore::new());
    let cache = Arc::new(PriceCache::new());
    let reader = PriceReader::new(cache, kv, MarketRestClient::new(None));
    let rates = ExchangeRateApi::new(db.clone(), None, dec!(15800));
    let (payout_queue, jobs) = PayoutQueue::new(16);
    let state = web::Data::new(AppState {
        orders: Arc::new(OrderFlowApi::new(db.clone(), EventProducers::default())),
        quotes: QuoteApi::new(db.clone(), reader, rates),
        provider: Arc::new(MockProvider::new()),
        payout_queue,
        server_key: Secret::new(SERVER_KEY.to_string()),
    });
    (db, state, jobs)
}

/// An order with a payment instrument attached, ready to receive webhooks.
async fn order_with_payment(db: &SqliteDatabase, state: &AppState) -> Order {
    let user = seed_user(db).await;
    let order = NewOrder::new(user.id, "bsc", "BNB", Idr::from(100_000)).with_payout(
        "0.009248".parse().unwrap(),
        5.0,
        WALLET,
    );
    let order = state.orders.create_order(order).await.unwrap();
    let (with_payment, _) =
        state.orders.create_payment(&order.order_id, PaymentMethod::Qris, state.provider.as_ref()).await.unwrap();
    with_payment
}

fn notification(midtrans_id: &str, gross: &str, transaction_status: &str) -> serde_json::Value {
    let signature = midtrans_tools::helpers::webhook_signature(
        midtrans_id,
        "200",
        gross,
        &Secret::new(SERVER_KEY.to_string()),
    );
    json!({
        "order_id": midtrans_id,
        "status_code": "200",
        "gross_amount": gross,
        "signature_key": signature,
        "transaction_status": transaction_status,
        "fraud_status": "accept",
    })
}

#[actix_web::test]
async fn settlement_marks_paid_and_enqueues_payout() {
    let (db, state, mut jobs) = setup().await;
    let order = order_with_payment(&db, &state).await;
    let app = test::init_service(App::new().app_data(state.clone()).service(payment_webhook)).await;

    let payload = notification(order.midtrans_id.as_deref().unwrap(), "100000.00", "settlement");
    let resp = test::call_service(&app, test::TestRequest::post().uri("/payments/webhook").set_json(&payload).to_request())
        .await;
    assert!(resp.status().is_success());

    let updated = db.fetch_order(&order.order_id).await.unwrap().unwrap();
    assert_eq!(updated.status, OrderStatusType::Paid);
    assert_eq!(jobs.try_recv().unwrap(), order.order_id);
}

#[actix_web::test]
async fn duplicate_delivery_produces_no_second_job() {
    let (db, state, mut jobs) = setup().await;
    let order = order_with_payment(&db, &state).await;
    let app = test::init_service(App::new().app_data(state.clone()).service(payment_webhook)).await;
    let payload = notification(order.midtrans_id.as_deref().unwrap(), "100000.00", "settlement");

    for _ in 0..2 {
        let resp =
            test::call_service(&app, test::TestRequest::post().uri("/payments/webhook").set_json(&payload).to_request())
                .await;
        assert!(resp.status().is_success());
    }
    assert!(jobs.try_recv().is_ok());
    assert!(jobs.try_recv().is_err(), "the duplicate delivery must not enqueue a second payout");
}

#[actix_web::test]
async fn invalid_signature_is_rejected() {
    let (db, state, _jobs) = setup().await;
    let order = order_with_payment(&db, &state).await;
    let app = test::init_service(App::new().app_data(state.clone()).service(payment_webhook)).await;

    let mut payload = notification(order.midtrans_id.as_deref().unwrap(), "100000.00", "settlement");
    payload["signature_key"] = json!("0000");
    let resp = test::call_service(&app, test::TestRequest::post().uri("/payments/webhook").set_json(&payload).to_request())
        .await;
    assert_eq!(resp.status(), 403);
    let untouched = db.fetch_order(&order.order_id).await.unwrap().unwrap();
    assert_eq!(untouched.status, OrderStatusType::Pending);
}

#[actix_web::test]
async fn amount_mismatch_is_acknowledged_but_ignored() {
    let (db, state, mut jobs) = setup().await;
    let order = order_with_payment(&db, &state).await;
    let app = test::init_service(App::new().app_data(state.clone()).service(payment_webhook)).await;

    // Correctly signed, but for the wrong amount: a fraud signal.
    let payload = notification(order.midtrans_id.as_deref().unwrap(), "5000.00", "settlement");
    let resp = test::call_service(&app, test::TestRequest::post().uri("/payments/webhook").set_json(&payload).to_request())
        .await;
    assert!(resp.status().is_success());
    let untouched = db.fetch_order(&order.order_id).await.unwrap().unwrap();
    assert_eq!(untouched.status, OrderStatusType::Pending);
    assert!(jobs.try_recv().is_err());
}

#[actix_web::test]
async fn unknown_gateway_id_is_acknowledged() {
    let (_db, state, _jobs) = setup().await;
    let app = test::init_service(App::new().app_data(state.clone()).service(payment_webhook)).await;
    let payload = notification("RP-nonexistent-123", "100000.00", "settlement");
    let resp = test::call_service(&app, test::TestRequest::post().uri("/payments/webhook").set_json(&payload).to_request())
        .await;
    assert!(resp.status().is_success());
}

#[actix_web::test]
async fn gateway_failure_cancels_the_order() {
    let (db, state, _jobs) = setup().await;
    let order = order_with_payment(&db, &state).await;
    let app = test::init_service(App::new().app_data(state.clone()).service(payment_webhook)).await;

    let payload = notification(order.midtrans_id.as_deref().unwrap(), "100000.00", "expire");
    let resp = test::call_service(&app, test::TestRequest::post().uri("/payments/webhook").set_json(&payload).to_request())
        .await;
    assert!(resp.status().is_success());
    let cancelled = db.fetch_order(&order.order_id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, OrderStatusType::Cancelled);
}
