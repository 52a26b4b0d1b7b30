use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;
use wayfarer_booking::orchestrator::{PaymentOrder, VerifyPaymentRequest};

use crate::extractors::extract_json;
use crate::{error::AppError, middleware::auth::AuthUser, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookingRef {
    booking_id: Uuid,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/payments/create-order", post(create_order))
        .route("/api/payments/verify", post(verify_payment))
        .route("/api/payments/refund", post(refund_booking))
        .route("/api/payments/vendor-payout", post(vendor_payout))
}

async fn create_order(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    body: Result<Json<BookingRef>, JsonRejection>,
) -> Result<Json<PaymentOrder>, AppError> {
    let req = extract_json(body)?;
    Ok(Json(state.orchestrator.create_payment_order(&actor, req.booking_id).await?))
}

async fn verify_payment(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    body: Result<Json<VerifyPaymentRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let req = extract_json(body)?;
    let verified = state.orchestrator.verify_payment(&actor, req).await?;
    Ok(Json(json!({
        "success": true,
        "bookingId": verified.booking_id,
        "alreadyConfirmed": verified.already_confirmed,
    })))
}

async fn refund_booking(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    body: Result<Json<BookingRef>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let req = extract_json(body)?;
    let refund = state.refunds.refund(&actor, req.booking_id).await?;
    Ok(Json(json!({
        "success": true,
        "refundId": refund.refund_id,
        "refundAmount": refund.refund_amount,
        "refundPercentage": refund.refund_percentage,
        "refundStatus": refund.refund_status,
        "message": refund.message,
    })))
}

async fn vendor_payout(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    body: Result<Json<BookingRef>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let req = extract_json(body)?;
    let payout = state.payouts.process_payout(&actor, req.booking_id).await?;
    Ok(Json(json!({
        "success": true,
        "transferId": payout.transfer_id,
        "payoutAmount": payout.payout_amount,
        "message": payout.message,
    })))
}
