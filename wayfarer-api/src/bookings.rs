use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use uuid::Uuid;
use wayfarer_booking::orchestrator::CreateBookingRequest;
use wayfarer_booking::refund::CancelRequest;
use wayfarer_core::Booking;

use crate::extractors::{extract_json, extract_path};
use crate::{error::AppError, middleware::auth::AuthUser, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/bookings", post(create_booking).get(list_bookings))
        .route("/api/bookings/{id}", get(get_booking))
        .route("/api/bookings/{id}/cancel", post(cancel_booking))
        .route("/api/bookings/{id}/abandon", post(abandon_booking))
}

async fn create_booking(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    body: Result<Json<CreateBookingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let req = extract_json(body)?;
    let booking = state.orchestrator.create_booking(&actor, req).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "bookingId": booking.id,
            "totalAmount": booking.total_amount,
        })),
    ))
}

async fn list_bookings(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> Result<Json<Vec<Booking>>, AppError> {
    Ok(Json(state.orchestrator.list_bookings(&actor).await?))
}

async fn get_booking(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Booking>, AppError> {
    let id = extract_path(id)?;
    Ok(Json(state.orchestrator.get_booking(&actor, id).await?))
}

/// The body is optional; an empty POST is a plain customer cancellation.
async fn cancel_booking(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    id: Result<Path<Uuid>, PathRejection>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let id = extract_path(id)?;
    let req: CancelRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CancelRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::ValidationError(format!("Invalid cancellation request: {}", e)))?
    };

    let outcome = state.refunds.cancel(&actor, id, req).await?;

    Ok(Json(json!({
        "success": true,
        "bookingId": outcome.booking_id,
        "cancelledBy": outcome.cancelled_by,
        "refundAmount": outcome.refund_amount,
        "refundPercentage": outcome.refund_percentage,
        "refundStatus": outcome.refund_status,
        "refundId": outcome.refund_id,
        "vendorPayoutAmount": outcome.vendor_payout_amount,
        "message": outcome.message,
    })))
}

async fn abandon_booking(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Value>, AppError> {
    let id = extract_path(id)?;
    let booking = state.orchestrator.abandon_booking(&actor, id).await?;
    Ok(Json(json!({ "success": true, "bookingId": booking.id })))
}
