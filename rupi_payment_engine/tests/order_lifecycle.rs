//! Order creation, payment attachment, cancellation and webhook idempotence.
use rpg_common::Idr;
use rupi_payment_engine::{
    db_types::{NewOrder, OrderStatusType, PaymentMethod},
    events::EventProducers,
    test_utils::{
        mocks::MockProvider,
        prepare_env::{prepare_test_env, scratch_db_url},
        seed::*,
    },
    traits::{
        CancelOutcome, InventoryManagement, PaymentGatewayDatabase, PaymentGatewayError, VoucherError,
        VoucherManagement,
    },
    OrderFlowApi, OrderFlowError, SqliteDatabase,
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

fn order_for(user_id: i64, amount_idr: i64) -> NewOrder {
    NewOrder::new(user_id, "bsc", "BNB", Idr::from(amount_idr)).with_payout(
        "0.009248".parse().unwrap(),
        5.0,
        WALLET,
    )
}

#[tokio::test]
async fn create_reserves_inventory() {
    let (db, api) = setup().await;
    let user = seed_user(&db).await;
    let order = api.create_order(order_for(user.id, 100_000)).await.unwrap();
    assert_eq!(order.status, OrderStatusType::Pending);
    assert_eq!(order.amount_idr, Idr::from(100_000));
    assert_eq!(order.wallet_address, WALLET);
    let inv = db.fetch_inventory("bsc", "BNB").await.unwrap().unwrap();
    assert_eq!(inv.reserved, "0.009248".parse().unwrap());
}

#[tokio::test]
async fn second_pending_order_is_rejected() {
    let (db, api) = setup().await;
    let user = seed_user(&db).await;
    api.create_order(order_for(user.id, 100_000)).await.unwrap();
    let err = api.create_order(order_for(user.id, 50_000)).await.unwrap_err();
    assert!(matches!(
        err,
        OrderFlowError::Database(PaymentGatewayError::PendingOrderExists(_))
    ));
    // Only one reservation was taken.
    let inv = db.fetch_inventory("bsc", "BNB").await.unwrap().unwrap();
    assert_eq!(inv.reserved, "0.009248".parse().unwrap());
}

#[tokio::test]
async fn insufficient_inventory_rejects_and_rolls_back() {
    let (db, api) = setup().await;
    db.sync_inventory_balance("bsc", "BNB", "0.001".parse().unwrap()).await.unwrap();
    let user = seed_user(&db).await;
    let err = api.create_order(order_for(user.id, 100_000)).await.unwrap_err();
    assert!(matches!(err, OrderFlowError::Database(PaymentGatewayError::InventoryError(_))));
    let inv = db.fetch_inventory("bsc", "BNB").await.unwrap().unwrap();
    assert!(inv.reserved.is_zero());
}

#[tokio::test]
async fn wrong_checksum_is_rejected() {
    let (db, api) = setup().await;
    let user = seed_user(&db).await;
    let mut order = order_for(user.id, 100_000);
    order.wallet_address = "0x5aaeb6053F3E94C9b9A09f33669435E7Ef1BeAed".to_string();
    assert!(matches!(api.create_order(order).await.unwrap_err(), OrderFlowError::InvalidAddress(_)));
}

#[tokio::test]
async fn ethereum_minimum_is_enforced() {
    let (db, api) = setup().await;
    seed_chain(&db, "ethereum", 1).await;
    seed_native_token(&db, "ethereum", "ETH", 5.0).await;
    seed_inventory(&db, "ethereum", "ETH", "5").await;
    let user = seed_user(&db).await;
    let order = NewOrder::new(user.id, "ethereum", "ETH", Idr::from(499_000)).with_payout(
        "0.01".parse().unwrap(),
        5.0,
        WALLET,
    );
    assert!(matches!(api.create_order(order).await.unwrap_err(), OrderFlowError::BelowChainMinimum));
}

#[tokio::test]
async fn voucher_discount_applies_to_payable() {
    let (db, api) = setup().await;
    let user = seed_user(&db).await;
    seed_public_voucher(&db, "P10K", 10_000, 50_000, 100).await;
    let order = api.create_order(order_for(user.id, 100_000).with_voucher("P10K")).await.unwrap();
    assert_eq!(order.amount_idr, Idr::from(90_000));
    let voucher = db.fetch_voucher("P10K").await.unwrap().unwrap();
    assert_eq!(voucher.usage_count, 1);
}

#[tokio::test]
async fn below_minimum_voucher_rolls_everything_back() {
    let (db, api) = setup().await;
    let user = seed_user(&db).await;
    seed_public_voucher(&db, "BIG", 10_000, 500_000, 100).await;
    let err = api.create_order(order_for(user.id, 100_000).with_voucher("BIG")).await.unwrap_err();
    assert!(matches!(
        err,
        OrderFlowError::Database(PaymentGatewayError::VoucherError(VoucherError::BelowMinimum(_)))
    ));
    // The enclosing transaction rolled back the inventory reservation too.
    let inv = db.fetch_inventory("bsc", "BNB").await.unwrap().unwrap();
    assert!(inv.reserved.is_zero());
    let voucher = db.fetch_voucher("BIG").await.unwrap().unwrap();
    assert_eq!(voucher.usage_count, 0);
}

#[tokio::test]
async fn payment_attachment_sets_fee_and_total() {
    let (db, api) = setup().await;
    let user = seed_user(&db).await;
    let order = api.create_order(order_for(user.id, 100_000)).await.unwrap();
    let provider = MockProvider::new();
    let (updated, charge) = api.create_payment(&order.order_id, PaymentMethod::Va, &provider).await.unwrap();
    assert_eq!(updated.fee_idr, Idr::from(4_000));
    assert_eq!(updated.total_pay, Idr::from(104_000));
    assert!(updated.midtrans_id.is_some());
    assert!(charge.va_number.is_some());

    // Regeneration overwrites the gateway id, orphaning the first instrument.
    let first_mid = updated.midtrans_id.clone().unwrap();
    let (again, _) = api.create_payment(&order.order_id, PaymentMethod::Qris, &provider).await.unwrap();
    assert_ne!(again.midtrans_id.clone().unwrap(), first_mid);
    assert_eq!(again.fee_idr, Idr::zero());
    assert_eq!(again.total_pay, Idr::from(100_000));
    assert!(db.fetch_order_by_midtrans_id(&first_mid).await.unwrap().is_none());
}

#[tokio::test]
async fn cancel_releases_and_is_idempotent() {
    let (db, api) = setup().await;
    let user = seed_user(&db).await;
    seed_public_voucher(&db, "P10K", 10_000, 50_000, 100).await;
    let order = api.create_order(order_for(user.id, 100_000).with_voucher("P10K")).await.unwrap();

    let first = api.cancel_order(&order.order_id).await.unwrap();
    assert!(matches!(first, CancelOutcome::Cancelled(_)));
    let inv = db.fetch_inventory("bsc", "BNB").await.unwrap().unwrap();
    assert!(inv.reserved.is_zero());
    assert_eq!(db.fetch_voucher("P10K").await.unwrap().unwrap().usage_count, 0);

    // Second cancel is a no-op, and must not release anything again.
    let second = api.cancel_order(&order.order_id).await.unwrap();
    assert!(matches!(second, CancelOutcome::AlreadyInactive(_)));
    let inv = db.fetch_inventory("bsc", "BNB").await.unwrap().unwrap();
    assert!(inv.reserved.is_zero());
    assert_eq!(db.fetch_voucher("P10K").await.unwrap().unwrap().usage_count, 0);
}

#[tokio::test]
async fn cancel_after_payment_is_refused() {
    let (db, api) = setup().await;
    let user = seed_user(&db).await;
    let order = api.create_order(order_for(user.id, 100_000)).await.unwrap();
    api.handle_payment_success(&order.order_id).await.unwrap().expect("transition to Paid");
    let err = api.cancel_order(&order.order_id).await.unwrap_err();
    assert!(matches!(
        err,
        OrderFlowError::Database(PaymentGatewayError::CancelForbidden { status: OrderStatusType::Paid, .. })
    ));
}

#[tokio::test]
async fn payment_success_is_idempotent() {
    let (db, api) = setup().await;
    let user = seed_user(&db).await;
    let order = api.create_order(order_for(user.id, 100_000)).await.unwrap();
    let first = api.handle_payment_success(&order.order_id).await.unwrap();
    assert!(first.is_some());
    assert!(first.unwrap().paid_at.is_some());
    // The duplicate webhook delivery finds status != Pending and does nothing.
    let second = api.handle_payment_success(&order.order_id).await.unwrap();
    assert!(second.is_none());
}
