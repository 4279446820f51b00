use chrono::{DateTime, Duration, Utc};
use log::trace;
use rpg_common::Idr;
use sqlx::{QueryBuilder, SqliteConnection};

use crate::{
    db_types::{NewOrder, Order, OrderId, OrderStatusType, PaymentAttachment},
    engine_api::order_objects::OrderQueryFilter,
    traits::PaymentGatewayError,
};

/// Inserts a new order in `Pending` status using the given connection. This is not atomic on its own; embed the
/// call inside a transaction and pass `&mut *tx` as the connection argument to couple it with the reservations.
pub async fn insert_order(
    order: &NewOrder,
    order_id: &OrderId,
    amount_payable: Idr,
    voucher_id: Option<i64>,
    conn: &mut SqliteConnection,
) -> Result<Order, PaymentGatewayError> {
    let inserted = sqlx::query_as(
        r#"
            INSERT INTO orders (
                order_id,
                user_id,
                chain,
                symbol,
                amount_idr,
                amount_token,
                markup_percent,
                wallet_address,
                voucher_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *;
        "#,
    )
    .bind(order_id)
    .bind(order.user_id)
    .bind(&order.chain)
    .bind(&order.symbol)
    .bind(amount_payable)
    .bind(order.amount_token)
    .bind(order.markup_percent)
    .bind(&order.wallet_address)
    .bind(voucher_id)
    .fetch_one(conn)
    .await?;
    Ok(inserted)
}

pub async fn fetch_order_by_order_id(
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order =
        sqlx::query_as("SELECT * FROM orders WHERE order_id = $1").bind(order_id.as_str()).fetch_optional(conn).await?;
    Ok(order)
}

/// Locates an order by the gateway-side order id of its most recent payment attempt. Webhooks for an overwritten
/// attempt find nothing here, by design.
pub async fn fetch_order_by_midtrans_id(
    midtrans_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order =
        sqlx::query_as("SELECT * FROM orders WHERE midtrans_id = $1").bind(midtrans_id).fetch_optional(conn).await?;
    Ok(order)
}

pub async fn fetch_pending_order_for_user(
    user_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as("SELECT * FROM orders WHERE user_id = $1 AND status = 'Pending' LIMIT 1")
        .bind(user_id)
        .fetch_optional(conn)
        .await?;
    Ok(order)
}

/// Attaches gateway payment artefacts to an order that is still `Pending`. Returns `None` when the order has left
/// `Pending` in the meantime.
pub async fn attach_payment(
    order_id: &OrderId,
    payment: &PaymentAttachment,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, PaymentGatewayError> {
    let order = sqlx::query_as(
        r#"
            UPDATE orders SET
                midtrans_id = $1,
                payment_url = $2,
                payment_method = $3,
                fee_idr = $4,
                total_pay = $5,
                updated_at = CURRENT_TIMESTAMP
            WHERE order_id = $6 AND status = 'Pending'
            RETURNING *;
        "#,
    )
    .bind(&payment.midtrans_id)
    .bind(&payment.payment_url)
    .bind(payment.payment_method)
    .bind(payment.fee_idr)
    .bind(payment.total_pay)
    .bind(order_id.as_str())
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

/// The conditional `Pending -> Paid` transition. Zero rows means another writer already advanced the order.
pub async fn mark_paid(order_id: &OrderId, conn: &mut SqliteConnection) -> Result<Option<Order>, PaymentGatewayError> {
    let order = sqlx::query_as(
        r#"
            UPDATE orders SET status = 'Paid', paid_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP
            WHERE order_id = $1 AND status = 'Pending'
            RETURNING *;
        "#,
    )
    .bind(order_id.as_str())
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

/// The payout claim. Counting a row here makes the caller the exclusive payout owner for this order.
pub async fn claim_for_payout(
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, PaymentGatewayError> {
    let order = sqlx::query_as(
        r#"
            UPDATE orders SET status = 'Processing', updated_at = CURRENT_TIMESTAMP
            WHERE order_id = $1 AND status = 'Paid' AND tx_hash IS NULL
            RETURNING *;
        "#,
    )
    .bind(order_id.as_str())
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

/// Optimistic steal of a stale `Processing` claim, guarded on the exact `updated_at` the caller observed. The
/// comparison happens at second precision via `unixepoch`, matching the precision `CURRENT_TIMESTAMP` writes.
pub async fn steal_stale_claim(
    order_id: &OrderId,
    seen_updated_at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, PaymentGatewayError> {
    let order = sqlx::query_as(
        r#"
            UPDATE orders SET updated_at = CURRENT_TIMESTAMP
            WHERE order_id = $1 AND status = 'Processing' AND unixepoch(updated_at) = unixepoch($2)
            RETURNING *;
        "#,
    )
    .bind(order_id.as_str())
    .bind(seen_updated_at)
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

/// Records the broadcast hash as soon as it is known, before finalisation. A worker crash after this point leaves a
/// `Processing` order with a non-null `tx_hash`, which routes every later consumer through the recovery path
/// instead of a second send.
pub async fn record_broadcast(
    order_id: &OrderId,
    tx_hash: &str,
    conn: &mut SqliteConnection,
) -> Result<(), PaymentGatewayError> {
    sqlx::query(
        "UPDATE orders SET tx_hash = $1, updated_at = CURRENT_TIMESTAMP WHERE order_id = $2 AND status = \
         'Processing' AND tx_hash IS NULL",
    )
    .bind(tx_hash)
    .bind(order_id.as_str())
    .execute(conn)
    .await?;
    Ok(())
}

/// The `Processing -> Success` transition. The inventory deduction belongs in the same enclosing transaction.
pub async fn finalize_success(
    order_id: &OrderId,
    tx_hash: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, PaymentGatewayError> {
    let order = sqlx::query_as(
        r#"
            UPDATE orders SET
                status = 'Success',
                tx_hash = $1,
                completed_at = CURRENT_TIMESTAMP,
                updated_at = CURRENT_TIMESTAMP
            WHERE order_id = $2 AND status = 'Processing'
            RETURNING *;
        "#,
    )
    .bind(tx_hash)
    .bind(order_id.as_str())
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

/// Conditional transition from any of `from` to `to`. Returns `None` when the order was not in one of the expected
/// states, i.e. another writer already effected a transition.
pub async fn update_status_conditional(
    order_id: &OrderId,
    from: &[OrderStatusType],
    to: OrderStatusType,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, PaymentGatewayError> {
    let status_clause = from.iter().map(|s| format!("'{s}'")).collect::<Vec<String>>().join(",");
    let sql = format!(
        "UPDATE orders SET status = $1, updated_at = CURRENT_TIMESTAMP WHERE order_id = $2 AND status IN \
         ({status_clause}) RETURNING *"
    );
    let order = sqlx::query_as(&sql).bind(to).bind(order_id.as_str()).fetch_optional(conn).await?;
    Ok(order)
}

/// `Pending` orders older than `age`, oldest first. These are the expiry sweep candidates.
pub async fn fetch_expiry_candidates(
    age: Duration,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, PaymentGatewayError> {
    let rows = sqlx::query_as(
        "SELECT * FROM orders WHERE status = 'Pending' AND (unixepoch(CURRENT_TIMESTAMP) - unixepoch(created_at)) > \
         $1 ORDER BY created_at ASC",
    )
    .bind(age.num_seconds())
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// `Paid` orders that have sat without a payout claim for longer than `age`. These lost their queue entry somewhere
/// between the webhook and the consumer and need to be re-enqueued.
pub async fn fetch_stalled_paid_orders(
    age: Duration,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, PaymentGatewayError> {
    let rows = sqlx::query_as(
        "SELECT * FROM orders WHERE status = 'Paid' AND tx_hash IS NULL AND (unixepoch(CURRENT_TIMESTAMP) - \
         unixepoch(updated_at)) > $1 ORDER BY updated_at ASC",
    )
    .bind(age.num_seconds())
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Fetches orders according to criteria specified in the `OrderQueryFilter`.
///
/// Resulting orders are ordered by `created_at` in ascending order.
pub async fn search_orders(query: OrderQueryFilter, conn: &mut SqliteConnection) -> Result<Vec<Order>, sqlx::Error> {
    let mut builder = QueryBuilder::new(
        r#"
    SELECT * FROM orders
    "#,
    );
    if !query.is_empty() {
        builder.push("WHERE ");
    }
    let mut where_clause = builder.separated(" AND ");
    if let Some(order_id) = query.order_id {
        where_clause.push("order_id = ");
        where_clause.push_bind_unseparated(order_id.0);
    }
    if let Some(user_id) = query.user_id {
        where_clause.push("user_id = ");
        where_clause.push_bind_unseparated(user_id);
    }
    if let Some(chain) = query.chain {
        where_clause.push("chain = ");
        where_clause.push_bind_unseparated(chain);
    }
    if query.status.as_ref().map(|s| !s.is_empty()).unwrap_or(false) {
        let mut statuses = vec![];
        query.status.as_ref().unwrap().iter().for_each(|s| {
            statuses.push(format!("'{s}'"));
        });
        let status_clause = statuses.join(",");
        where_clause.push(format!("status IN ({status_clause})"));
    }
    if let Some(since) = query.since {
        where_clause.push("created_at >= ");
        where_clause.push_bind_unseparated(since);
    }
    if let Some(until) = query.until {
        where_clause.push("created_at <= ");
        where_clause.push_bind_unseparated(until);
    }
    builder.push(" ORDER BY created_at ASC");

    trace!("📝️ Executing query: {}", builder.sql());
    let query = builder.build_query_as::<Order>();
    let orders = query.fetch_all(conn).await?;
    trace!("📝️ Result of search_orders: {:?}", orders.len());
    Ok(orders)
}

/// Counts orders by the given user that use the given voucher and sit in one of `statuses`.
pub async fn count_orders_with_voucher(
    user_id: i64,
    voucher_id: i64,
    statuses: &[OrderStatusType],
    conn: &mut SqliteConnection,
) -> Result<i64, sqlx::Error> {
    let status_clause = statuses.iter().map(|s| format!("'{s}'")).collect::<Vec<String>>().join(",");
    let sql = format!(
        "SELECT COUNT(*) FROM orders WHERE user_id = $1 AND voucher_id = $2 AND status IN ({status_clause})"
    );
    let (count,): (i64,) = sqlx::query_as(&sql).bind(user_id).bind(voucher_id).fetch_one(conn).await?;
    Ok(count)
}

pub async fn count_success_orders(user_id: i64, conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM orders WHERE user_id = $1 AND status = 'Success'")
            .bind(user_id)
            .fetch_one(conn)
            .await?;
    Ok(count)
}
