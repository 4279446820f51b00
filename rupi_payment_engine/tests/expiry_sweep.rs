//! Expiry reconciliation: the payment-status safety check, the grace window, and the stalled-paid rescue.
use std::sync::atomic::Ordering;

use rpg_common::Idr;
use rupi_payment_engine::{
    db_types::{NewOrder, Order, OrderStatusType, PaymentMethod},
    events::EventProducers,
    test_utils::{
        mocks::MockProvider,
        prepare_env::{prepare_test_env, scratch_db_url},
        seed::*,
    },
    traits::{GatewayStatus, InventoryManagement, PaymentGatewayDatabase},
    OrderFlowApi, SqliteDatabase,
};

const WALLET: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

async fn setup() -> (SqliteDatabase, OrderFlowApi<SqliteDatabase>) {
    let url = scratch_db_url();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
    seed_chain(&db, "bsc", 56).await;
    seed_native_token(&db, "bsc", "BNB", 5.0).await;
    seed_inventory(&db, "bsc", "BNB", "10").await;
    let api = OrderFlowApi::new(db.clone(), EventProducers::default());
    (db, api)
}

async fn pending_order(db: &SqliteDatabase, api: &OrderFlowApi<SqliteDatabase>) -> Order {
    let user = seed_user(db).await;
    let order = NewOrder::new(user.id, "bsc", "BNB", Idr::from(100_000)).with_payout(
        "0.009248".parse().unwrap(),
        5.0,
        WALLET,
    );
    api.create_order(order).await.unwrap()
}

async fn backdate_created(db: &SqliteDatabase, order: &Order, minutes: i64) {
    sqlx::query(&format!(
        "UPDATE orders SET created_at = datetime('now', '-{minutes} minutes') WHERE order_id = $1"
    ))
    .bind(order.order_id.as_str())
    .execute(db.pool())
    .await
    .unwrap();
}

#[tokio::test]
async fn young_orders_are_left_alone() {
    let (db, api) = setup().await;
    let order = pending_order(&db, &api).await;
    let provider = MockProvider::new();
    let result = api.expire_sweep(&provider).await.unwrap();
    assert_eq!(result.total_count(), 0);
    let current = db.fetch_order(&order.order_id).await.unwrap().unwrap();
    assert_eq!(current.status, OrderStatusType::Pending);
}

#[tokio::test]
async fn aged_unpaid_order_expires_and_releases() {
    let (db, api) = setup().await;
    let order = pending_order(&db, &api).await;
    backdate_created(&db, &order, 20).await;
    let provider = MockProvider::new();

    let result = api.expire_sweep(&provider).await.unwrap();
    assert_eq!(result.expired.len(), 1);
    let current = db.fetch_order(&order.order_id).await.unwrap().unwrap();
    assert_eq!(current.status, OrderStatusType::Expired);
    let inv = db.fetch_inventory("bsc", "BNB").await.unwrap().unwrap();
    assert!(inv.reserved.is_zero());
}

#[tokio::test]
async fn settled_payment_diverts_instead_of_expiring() {
    let (db, api) = setup().await;
    let order = pending_order(&db, &api).await;
    let provider = MockProvider::new();
    let (with_payment, _) = api.create_payment(&order.order_id, PaymentMethod::Qris, &provider).await.unwrap();
    backdate_created(&db, &order, 16).await;
    provider.set_status(with_payment.midtrans_id.as_deref().unwrap(), GatewayStatus::Settled);

    let result = api.expire_sweep(&provider).await.unwrap();
    assert_eq!(result.expired.len(), 0);
    assert_eq!(result.diverted.len(), 1);
    let current = db.fetch_order(&order.order_id).await.unwrap().unwrap();
    assert_eq!(current.status, OrderStatusType::Paid);
    // Inventory is preserved for the payout.
    let inv = db.fetch_inventory("bsc", "BNB").await.unwrap().unwrap();
    assert_eq!(inv.reserved, "0.009248".parse().unwrap());
}

#[tokio::test]
async fn gateway_pending_gets_the_grace_window() {
    let (db, api) = setup().await;
    let order = pending_order(&db, &api).await;
    let provider = MockProvider::new();
    let (with_payment, _) = api.create_payment(&order.order_id, PaymentMethod::Qris, &provider).await.unwrap();
    provider.set_status(with_payment.midtrans_id.as_deref().unwrap(), GatewayStatus::Pending);

    // 20 minutes old: inside the 70-minute grace window while the gateway still says pending.
    backdate_created(&db, &order, 20).await;
    let result = api.expire_sweep(&provider).await.unwrap();
    assert_eq!(result.total_count(), 0);
    assert_eq!(db.fetch_order(&order.order_id).await.unwrap().unwrap().status, OrderStatusType::Pending);

    // Past the grace window the order expires even though the gateway says pending.
    backdate_created(&db, &order, 80).await;
    let result = api.expire_sweep(&provider).await.unwrap();
    assert_eq!(result.expired.len(), 1);
}

#[tokio::test]
async fn unreachable_gateway_blocks_expiry() {
    let (db, api) = setup().await;
    let order = pending_order(&db, &api).await;
    let provider = MockProvider::new();
    api.create_payment(&order.order_id, PaymentMethod::Qris, &provider).await.unwrap();
    backdate_created(&db, &order, 120).await;
    provider.unreachable.store(true, Ordering::SeqCst);

    let result = api.expire_sweep(&provider).await.unwrap();
    assert_eq!(result.total_count(), 0);
    assert_eq!(db.fetch_order(&order.order_id).await.unwrap().unwrap().status, OrderStatusType::Pending);
}

#[tokio::test]
async fn stalled_paid_orders_are_collected_for_rescue() {
    let (db, api) = setup().await;
    let order = pending_order(&db, &api).await;
    api.handle_payment_success(&order.order_id).await.unwrap().unwrap();
    sqlx::query("UPDATE orders SET updated_at = datetime('now', '-15 minutes') WHERE order_id = $1")
        .bind(order.order_id.as_str())
        .execute(db.pool())
        .await
        .unwrap();

    let provider = MockProvider::new();
    let result = api.expire_sweep(&provider).await.unwrap();
    assert_eq!(result.rescued.len(), 1);
    assert_eq!(result.rescued[0].order_id, order.order_id);
}

#[tokio::test]
async fn sync_order_promotes_settled_payment() {
    let (db, api) = setup().await;
    let order = pending_order(&db, &api).await;
    let provider = MockProvider::new();
    let (with_payment, _) = api.create_payment(&order.order_id, PaymentMethod::Qris, &provider).await.unwrap();
    provider.set_status(with_payment.midtrans_id.as_deref().unwrap(), GatewayStatus::Settled);

    let (latest, promoted) = api.sync_order(&order.order_id, &provider).await.unwrap();
    assert!(promoted.is_some());
    assert_eq!(latest.status, OrderStatusType::Paid);
    // A second sync is a no-op.
    let (_, promoted_again) = api.sync_order(&order.order_id, &provider).await.unwrap();
    assert!(promoted_again.is_none());
}
