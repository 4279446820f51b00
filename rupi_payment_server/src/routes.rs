//! Request handler definitions
//!
//! Define each route and its handler here. Handlers that are more than a line or two MUST go into a separate
//! module. Keep this module neat and tidy 🙏
use actix_web::{get, post, web, HttpResponse, Responder};
use log::*;
use rpg_common::{helpers::parse_idr_input, Idr};
use rupi_payment_engine::{
    db_types::{NewOrder, OrderId, PaymentMethod},
    traits::{CancelOutcome, PaymentGatewayDatabase, PaymentGatewayError},
    OrderFlowError,
};
use serde_json::json;

use crate::{
    auth::{AdminUser, AuthenticatedUser},
    data_objects::{
        CreateOrderRequest, JsonResponse, MarkSuccessRequest, OrderResponse, PayRequest, PaymentResponse, QuoteParams,
    },
    errors::ServerError,
    server::AppState,
};

#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(JsonResponse::ok("👍️"))
}

/// Public, unauthenticated quote endpoint.
#[get("/pricing/quote")]
pub async fn quote(params: web::Query<QuoteParams>, state: web::Data<AppState>) -> Result<HttpResponse, ServerError> {
    let amount = parse_idr_input(&params.amount_idr).map_err(|e| ServerError::Validation(e.to_string()))?;
    let quote = state.quotes.quote(&params.chain, Idr::from(amount)).await?;
    Ok(HttpResponse::Ok().json(quote))
}

/// Registered manually in `server.rs` so the order-creation rate limit wraps exactly this resource.
pub async fn create_order(
    user: AuthenticatedUser,
    body: web::Json<CreateOrderRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let amount = parse_idr_input(&body.amount_idr).map_err(|e| ServerError::Validation(e.to_string()))?;
    let amount = Idr::from(amount);
    let price_quote = state.quotes.quote(&body.chain, amount).await?;
    let mut order = NewOrder::new(user.user_id, &body.chain, &price_quote.symbol, amount).with_payout(
        price_quote.token_amount,
        price_quote.markup_percent,
        &body.wallet_address,
    );
    if let Some(code) = &body.voucher_code {
        order = order.with_voucher(code);
    }
    match state.orders.create_order(order).await {
        Ok(created) => Ok(HttpResponse::Created().json(json!({ "order": OrderResponse::from(&created) }))),
        Err(OrderFlowError::Database(PaymentGatewayError::PendingOrderExists(pending))) => {
            Ok(HttpResponse::Conflict().json(json!({
                "error": "PENDING_ORDER_EXISTS",
                "pendingOrder": OrderResponse::from(pending.as_ref()),
            })))
        },
        Err(e) => Err(e.into()),
    }
}

#[post("/orders/{id}/pay")]
pub async fn pay_order(
    user: AuthenticatedUser,
    path: web::Path<String>,
    body: web::Json<PayRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let order_id = OrderId::from(path.into_inner());
    let method: PaymentMethod =
        body.method.parse().map_err(|_| ServerError::Validation(format!("Unknown payment method {}", body.method)))?;
    owned_order(&state, &order_id, user).await?;
    let (order, charge) = state.orders.create_payment(&order_id, method, state.provider.as_ref()).await?;
    Ok(HttpResponse::Ok().json(PaymentResponse {
        order_id: order.order_id.as_str().to_string(),
        payment_url: charge.payment_url,
        qr_string: charge.qr_string,
        va_number: charge.va_number,
        fee: order.fee_idr,
        total_pay: order.total_pay,
        expiry_time: charge.expiry_time,
    }))
}

/// Re-reads the gateway and may promote the order; the promoted order gets its payout enqueued here.
#[post("/orders/{id}/sync")]
pub async fn sync_order(
    user: AuthenticatedUser,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let order_id = OrderId::from(path.into_inner());
    owned_order(&state, &order_id, user).await?;
    let (latest, promoted) = state.orders.sync_order(&order_id, state.provider.as_ref()).await?;
    if let Some(paid) = promoted {
        state.payout_queue.enqueue(paid.order_id).await;
    }
    Ok(HttpResponse::Ok().json(json!({ "status": latest.status })))
}

#[post("/orders/{id}/cancel")]
pub async fn cancel_order(
    user: AuthenticatedUser,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let order_id = OrderId::from(path.into_inner());
    owned_order(&state, &order_id, user).await?;
    match state.orders.cancel_order(&order_id).await {
        Ok(CancelOutcome::Cancelled(_)) => Ok(HttpResponse::Ok().json(JsonResponse::ok("Order cancelled"))),
        Ok(CancelOutcome::AlreadyInactive(order)) => {
            Ok(HttpResponse::Ok().json(JsonResponse::ok(format!("Order is already {}", order.status))))
        },
        Err(OrderFlowError::Database(PaymentGatewayError::CancelForbidden { status, .. })) => {
            Ok(HttpResponse::BadRequest()
                .json(JsonResponse::failure(format!("Order cannot be cancelled while it is {status}"))))
        },
        Err(e) => Err(e.into()),
    }
}

#[post("/admin/orders/{id}/retry")]
pub async fn admin_retry(
    admin: AdminUser,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let order_id = OrderId::from(path.into_inner());
    state.orders.db().fetch_order(&order_id).await.map_err(OrderFlowError::from)?.ok_or(ServerError::NotFound)?;
    info!("🔧️ Admin {} requested a payout retry for {order_id}", admin.user_id);
    state.payout_queue.enqueue(order_id).await;
    Ok(HttpResponse::Ok().json(JsonResponse::ok("Payout re-enqueued")))
}

#[post("/admin/orders/{id}/mark-success")]
pub async fn admin_mark_success(
    admin: AdminUser,
    path: web::Path<String>,
    body: web::Json<MarkSuccessRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let order_id = OrderId::from(path.into_inner());
    info!("🔧️ Admin {} is marking {order_id} as successful with tx {}", admin.user_id, body.tx_hash);
    let outcome = state.orders.mark_success_manual(&order_id, &body.tx_hash).await?;
    Ok(HttpResponse::Ok().json(json!({ "outcome": format!("{outcome:?}") })))
}

/// Loads the order and verifies the caller owns it (admins see everything).
async fn owned_order(state: &AppState, order_id: &OrderId, user: AuthenticatedUser) -> Result<(), ServerError> {
    let order = state
        .orders
        .db()
        .fetch_order(order_id)
        .await
        .map_err(OrderFlowError::from)?
        .ok_or(ServerError::NotFound)?;
    if order.user_id != user.user_id && user.role != rupi_payment_engine::db_types::Role::Admin {
        return Err(ServerError::Forbidden);
    }
    Ok(())
}
