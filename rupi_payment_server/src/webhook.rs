//! The payment-gateway webhook reconciler.
//!
//! Midtrans retries undelivered notifications aggressively, so every non-fraud outcome answers 200, including
//! internal errors, which are reported in the body rather than via status code. The only hard rejection is a bad
//! signature.
use actix_web::{post, web, HttpResponse};
use log::*;
use midtrans_tools::{helpers::verify_webhook_signature, StatusResponse};
use rpg_common::Idr;
use rust_decimal::Decimal;

use crate::{
    data_objects::{JsonResponse, WebhookPayload},
    server::AppState,
};

/// Amount tolerance: half a percent of the expected settlement, floored at Rp 1000.
fn amount_tolerance(expected: Idr) -> Decimal {
    let half_percent = Decimal::from(expected.value()) * Decimal::new(5, 3);
    half_percent.max(Decimal::from(1000))
}

#[post("/payments/webhook")]
pub async fn payment_webhook(body: web::Json<WebhookPayload>, state: web::Data<AppState>) -> HttpResponse {
    let payload = body.into_inner();

    // 1. Signature check. The one case that earns a rejection.
    if !verify_webhook_signature(
        &payload.order_id,
        &payload.status_code,
        &payload.gross_amount,
        &state.server_key,
        &payload.signature_key,
    ) {
        warn!("📨️ Webhook for {} carried an invalid signature", payload.order_id);
        return HttpResponse::Forbidden().json(JsonResponse::failure("Invalid signature"));
    }

    match reconcile(&payload, &state).await {
        Ok(message) => HttpResponse::Ok().json(JsonResponse::ok(message)),
        Err(message) => {
            error!("📨️ Webhook for {} hit an internal error: {message}", payload.order_id);
            HttpResponse::Ok().json(JsonResponse::failure(message))
        },
    }
}

async fn reconcile(payload: &WebhookPayload, state: &AppState) -> Result<String, String> {
    use rupi_payment_engine::traits::PaymentGatewayDatabase;

    // 2. Locate by gateway id. Absence is normal: the payment may have been regenerated.
    let order = state
        .orders
        .db()
        .fetch_order_by_midtrans_id(&payload.order_id)
        .await
        .map_err(|e| e.to_string())?;
    let Some(order) = order else {
        debug!("📨️ No order for gateway id {} (stale instrument?); acknowledging", payload.order_id);
        return Ok("Unknown order id acknowledged".into());
    };

    // 3. Amount check. A mismatch beyond tolerance is a fraud signal: log it, acknowledge it, touch nothing.
    let gross: Decimal = payload.gross_amount.parse().map_err(|_| "Unparseable gross_amount".to_string())?;
    let expected = order.expected_settlement();
    let drift = (gross - Decimal::from(expected.value())).abs();
    if drift > amount_tolerance(expected) {
        error!(
            "📨️ FRAUD SIGNAL: webhook for {} reports {gross} but the order expects {expected}. Order untouched.",
            order.order_id
        );
        return Ok("Amount mismatch recorded".into());
    }

    // 4. Idempotency: only Pending orders react to webhooks.
    if order.status != rupi_payment_engine::db_types::OrderStatusType::Pending {
        debug!("📨️ Order {} is already {}; duplicate delivery acknowledged", order.order_id, order.status);
        return Ok("Already processed".into());
    }

    // 5. Classify and apply.
    let class = StatusResponse {
        status_code: payload.status_code.clone(),
        order_id: Some(payload.order_id.clone()),
        transaction_status: Some(payload.transaction_status.clone()),
        fraud_status: payload.fraud_status.clone(),
        gross_amount: Some(payload.gross_amount.clone()),
        signature_key: None,
    }
    .classify();
    match class {
        midtrans_tools::PaymentClass::Settled => {
            let paid = state.orders.handle_payment_success(&order.order_id).await.map_err(|e| e.to_string())?;
            if let Some(paid) = paid {
                state.payout_queue.enqueue(paid.order_id).await;
                Ok("Payment recorded; payout enqueued".into())
            } else {
                Ok("Already processed".into())
            }
        },
        midtrans_tools::PaymentClass::Failed => {
            state.orders.cancel_for_gateway(&order.order_id).await.map_err(|e| e.to_string())?;
            Ok("Gateway failure recorded".into())
        },
        midtrans_tools::PaymentClass::Pending | midtrans_tools::PaymentClass::NotFound => {
            Ok("Still pending".into())
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tolerance_floors_at_one_thousand() {
        assert_eq!(amount_tolerance(Idr::from(100_000)), Decimal::from(1000));
        assert_eq!(amount_tolerance(Idr::from(10_000)), Decimal::from(1000));
        // 0.5% of 1,000,000 = 5,000
        assert_eq!(amount_tolerance(Idr::from(1_000_000)), Decimal::from(5000));
    }
}
