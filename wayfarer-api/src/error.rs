use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use wayfarer_booking::BookingError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    AuthenticationError(String),
    #[error("{0}")]
    AuthorizationError(String),
    #[error("{0}")]
    ValidationError(String),
    #[error("{0}")]
    NotFoundError(String),
    #[error("{0}")]
    ConflictError(String),
    #[error("Too many requests")]
    RateLimited,
    #[error("Payment provider error: {0}")]
    BadGateway(String),
    #[error("Payment {payment_id} refunded: {reason}")]
    PaymentRefunded { payment_id: String, reason: String },
    #[error("Payment {payment_id} could not be refunded: {reason}")]
    CompensationFailed { payment_id: String, reason: String },
    #[error("{0}")]
    InternalServerError(String),
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::Validation(msg) => AppError::ValidationError(msg),
            BookingError::StateConflict(msg) => AppError::ValidationError(msg),
            BookingError::InvalidSignature => AppError::ValidationError("Invalid payment signature".to_string()),
            BookingError::NotFound(msg) => AppError::NotFoundError(msg),
            BookingError::Unauthorized(msg) => AppError::AuthenticationError(msg),
            BookingError::Forbidden(msg) => AppError::AuthorizationError(msg),
            err @ BookingError::CapacityExceeded { .. } => AppError::ConflictError(err.to_string()),
            BookingError::Gateway(e) => AppError::BadGateway(e.to_string()),
            BookingError::PaymentRefunded { payment_id, reason } => AppError::PaymentRefunded { payment_id, reason },
            BookingError::CompensationFailed { payment_id, reason } => AppError::CompensationFailed { payment_id, reason },
            BookingError::Persistence(msg) => AppError::InternalServerError(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, json!({ "error": msg })),
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, json!({ "error": msg })),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({ "error": "Too many requests" }),
            ),
            AppError::BadGateway(msg) => {
                tracing::error!("Gateway error: {}", msg);
                (StatusCode::BAD_GATEWAY, json!({ "error": "Payment provider error" }))
            }
            AppError::PaymentRefunded { payment_id, reason } => (
                StatusCode::CONFLICT,
                json!({
                    "error": "Booking could not be completed; your payment has been refunded",
                    "details": reason,
                    "paymentId": payment_id,
                }),
            ),
            AppError::CompensationFailed { payment_id, reason } => {
                tracing::error!("Compensation failed for payment {}: {}", payment_id, reason);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "error": "Booking could not be completed and the automatic refund failed",
                        "paymentId": payment_id,
                        "hint": "Contact support with this payment id for a manual refund",
                    }),
                )
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "Internal Server Error" }))
            }
        };

        (status, Json(body)).into_response()
    }
}
