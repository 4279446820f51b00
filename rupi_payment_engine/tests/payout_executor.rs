//! The payout executor: at-most-once sends, broadcast ambiguity, safe failures, recovery and zombie stealing.
use std::sync::Arc;

use rpg_common::Idr;
use rupi_payment_engine::{
    db_types::{NewOrder, Order, OrderStatusType},
    events::EventProducers,
    test_utils::{
        mocks::{MockWallet, SendScript},
        prepare_env::{prepare_test_env, scratch_db_url},
        seed::*,
    },
    traits::{InventoryManagement, PaymentGatewayDatabase, VoucherManagement},
    OrderFlowApi, OrderFlowError, PayoutOutcome, SqliteDatabase,
};

const WALLET: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

async fn setup() -> (SqliteDatabase, OrderFlowApi<SqliteDatabase>) {
    let url = scratch_db_url();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 8).await.expect("Error creating database");
    seed_chain(&db, "bsc", 56).await;
    seed_native_token(&db, "bsc", "BNB", 5.0).await;
    seed_inventory(&db, "bsc", "BNB", "10").await;
    let api = OrderFlowApi::new(db.clone(), EventProducers::default());
    (db, api)
}

/// Create an order and take it to `Paid`, ready for the executor.
async fn paid_order(db: &SqliteDatabase, api: &OrderFlowApi<SqliteDatabase>) -> Order {
    let user = seed_user(db).await;
    let order = NewOrder::new(user.id, "bsc", "BNB", Idr::from(100_000)).with_payout(
        "0.009248".parse().unwrap(),
        5.0,
        WALLET,
    );
    let order = api.create_order(order).await.unwrap();
    api.handle_payment_success(&order.order_id).await.unwrap().expect("transition to Paid")
}

async fn backdate_processing(db: &SqliteDatabase, order: &Order, minutes: i64) {
    sqlx::query(&format!(
        "UPDATE orders SET updated_at = datetime('now', '-{minutes} minutes') WHERE order_id = $1"
    ))
    .bind(order.order_id.as_str())
    .execute(db.pool())
    .await
    .unwrap();
}

#[tokio::test]
async fn happy_path_completes_and_deducts() {
    let (db, api) = setup().await;
    let order = paid_order(&db, &api).await;
    let wallet = MockWallet::confirming("0xabc123");

    let outcome = api.process_order(&order.order_id, &wallet).await.unwrap();
    let PayoutOutcome::Completed(done) = outcome else { panic!("expected Completed, got {outcome:?}") };
    assert_eq!(done.status, OrderStatusType::Success);
    assert_eq!(done.tx_hash.as_deref(), Some("0xabc123"));
    assert!(done.completed_at.is_some());

    // Inventory is deducted on both axes.
    let inv = db.fetch_inventory("bsc", "BNB").await.unwrap().unwrap();
    assert!(inv.reserved.is_zero());
    assert_eq!(inv.balance, "9.990752".parse().unwrap());
    assert_eq!(wallet.send_count(), 1);
}

#[tokio::test]
async fn concurrent_executors_send_exactly_once() {
    let (db, api) = setup().await;
    let order = paid_order(&db, &api).await;
    let api = Arc::new(api);
    let wallet = Arc::new(MockWallet::confirming("0xonce"));

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let api = api.clone();
        let wallet = wallet.clone();
        let order_id = order.order_id.clone();
        tasks.push(tokio::spawn(async move { api.process_order(&order_id, &*wallet).await }));
    }
    for task in tasks {
        // Every invocation resolves cleanly; the non-winners are no-ops.
        task.await.unwrap().unwrap();
    }
    assert_eq!(wallet.send_count(), 1, "exactly one send may reach the chain");
    let done = db.fetch_order(&order.order_id).await.unwrap().unwrap();
    assert_eq!(done.status, OrderStatusType::Success);
}

#[tokio::test]
async fn broadcast_ambiguity_finalizes_with_the_hash() {
    let (db, api) = setup().await;
    let order = paid_order(&db, &api).await;
    let wallet = MockWallet::scripted(vec![SendScript::Broadcast("0xdef456".into())]);

    let outcome = api.process_order(&order.order_id, &wallet).await.unwrap();
    assert!(matches!(outcome, PayoutOutcome::Completed(_)));
    let done = db.fetch_order(&order.order_id).await.unwrap().unwrap();
    assert_eq!(done.status, OrderStatusType::Success);
    assert_eq!(done.tx_hash.as_deref(), Some("0xdef456"));
    // No refund happened: the reservation was deducted, not released.
    let inv = db.fetch_inventory("bsc", "BNB").await.unwrap().unwrap();
    assert!(inv.reserved.is_zero());
    assert_eq!(inv.balance, "9.990752".parse().unwrap());

    // A retry routes through recovery, not a second send.
    let retry_wallet = MockWallet::scripted(vec![]);
    let retry = api.process_order(&order.order_id, &retry_wallet).await.unwrap();
    assert!(matches!(retry, PayoutOutcome::AlreadyComplete(_)));
    assert_eq!(retry_wallet.send_count(), 0);
}

#[tokio::test]
async fn safe_failure_refunds_reservations() {
    let (db, api) = setup().await;
    let user = seed_user(&db).await;
    seed_public_voucher(&db, "P10K", 10_000, 50_000, 100).await;
    let order = NewOrder::new(user.id, "bsc", "BNB", Idr::from(100_000))
        .with_payout("0.009248".parse().unwrap(), 5.0, WALLET)
        .with_voucher("P10K");
    let order = api.create_order(order).await.unwrap();
    api.handle_payment_success(&order.order_id).await.unwrap().unwrap();
    let wallet = MockWallet::scripted(vec![SendScript::Reject("insufficient funds for gas * price + value".into())]);

    let outcome = api.process_order(&order.order_id, &wallet).await.unwrap();
    let PayoutOutcome::Failed(failed, _) = outcome else { panic!("expected Failed, got {outcome:?}") };
    assert_eq!(failed.status, OrderStatusType::Failed);
    assert!(failed.tx_hash.is_none());
    let inv = db.fetch_inventory("bsc", "BNB").await.unwrap().unwrap();
    assert!(inv.reserved.is_zero());
    assert_eq!(inv.balance, "10".parse().unwrap());
    assert_eq!(db.fetch_voucher("P10K").await.unwrap().unwrap().usage_count, 0);
}

#[tokio::test]
async fn ambiguous_failure_freezes_the_order() {
    let (db, api) = setup().await;
    let order = paid_order(&db, &api).await;
    let wallet = MockWallet::scripted(vec![SendScript::Reject("connection reset by peer".into())]);

    let err = api.process_order(&order.order_id, &wallet).await.unwrap_err();
    assert!(matches!(err, OrderFlowError::AmbiguousSendFailure { .. }));
    let frozen = db.fetch_order(&order.order_id).await.unwrap().unwrap();
    assert_eq!(frozen.status, OrderStatusType::Processing);
    assert!(frozen.tx_hash.is_none());
    // The reservation is NOT refunded: money may be in flight.
    let inv = db.fetch_inventory("bsc", "BNB").await.unwrap().unwrap();
    assert_eq!(inv.reserved, "0.009248".parse().unwrap());
}

#[tokio::test]
async fn zombie_claim_is_stolen_and_executed() {
    let (db, api) = setup().await;
    let order = paid_order(&db, &api).await;
    // A worker claims the order and dies.
    let claim = db.claim_for_payout(&order.order_id).await.unwrap();
    assert!(matches!(claim, rupi_payment_engine::traits::PayoutClaim::Claimed(_)));
    backdate_processing(&db, &order, 12).await;

    let wallet = MockWallet::confirming("0xstolen");
    let outcome = api.process_order(&order.order_id, &wallet).await.unwrap();
    assert!(matches!(outcome, PayoutOutcome::Completed(_)));
    assert_eq!(wallet.send_count(), 1);
    let done = db.fetch_order(&order.order_id).await.unwrap().unwrap();
    assert_eq!(done.status, OrderStatusType::Success);
}

#[tokio::test]
async fn fresh_processing_claim_is_not_stolen() {
    let (db, api) = setup().await;
    let order = paid_order(&db, &api).await;
    db.claim_for_payout(&order.order_id).await.unwrap();

    let wallet = MockWallet::confirming("0xnever");
    let outcome = api.process_order(&order.order_id, &wallet).await.unwrap();
    assert!(matches!(outcome, PayoutOutcome::Skipped(_)));
    assert_eq!(wallet.send_count(), 0);
}

#[tokio::test]
async fn losing_steal_race_matches_zero_rows() {
    let (db, api) = setup().await;
    let order = paid_order(&db, &api).await;
    db.claim_for_payout(&order.order_id).await.unwrap();
    backdate_processing(&db, &order, 12).await;
    let stale = db.fetch_order(&order.order_id).await.unwrap().unwrap();

    // First steal with the observed timestamp wins; the second, guarded on the same timestamp, matches nothing.
    let first = db.steal_stale_claim(&order.order_id, stale.updated_at).await.unwrap();
    assert!(first.is_some());
    let second = db.steal_stale_claim(&order.order_id, stale.updated_at).await.unwrap();
    assert!(second.is_none());
}

#[tokio::test]
async fn recorded_broadcast_recovers_without_sending() {
    let (db, api) = setup().await;
    let order = paid_order(&db, &api).await;
    // A worker claimed, broadcast, recorded the hash, and died before finalising.
    db.claim_for_payout(&order.order_id).await.unwrap();
    db.record_broadcast(&order.order_id, "0xrecovered").await.unwrap();

    let wallet = MockWallet::scripted(vec![]);
    let outcome = api.process_order(&order.order_id, &wallet).await.unwrap();
    let PayoutOutcome::Recovered(done) = outcome else { panic!("expected Recovered, got {outcome:?}") };
    assert_eq!(done.status, OrderStatusType::Success);
    assert_eq!(done.tx_hash.as_deref(), Some("0xrecovered"));
    assert_eq!(wallet.send_count(), 0, "recovery must never send again");
}

#[tokio::test]
async fn manual_mark_success_uses_the_claim_machinery() {
    let (db, api) = setup().await;
    let order = paid_order(&db, &api).await;
    let outcome = api.mark_success_manual(&order.order_id, "0xmanual").await.unwrap();
    assert!(matches!(outcome, PayoutOutcome::Completed(_)));
    let done = db.fetch_order(&order.order_id).await.unwrap().unwrap();
    assert_eq!(done.tx_hash.as_deref(), Some("0xmanual"));
    let inv = db.fetch_inventory("bsc", "BNB").await.unwrap().unwrap();
    assert!(inv.reserved.is_zero());
}
