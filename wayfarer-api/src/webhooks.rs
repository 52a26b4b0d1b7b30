use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tracing::debug;

use crate::{error::AppError, state::AppState};

const SIGNATURE_HEADER: &str = "x-razorpay-signature";

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/payments/webhook", post(payment_webhook))
}

/// Takes the raw body: the signature covers the exact bytes the provider sent.
async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let outcome = state.reconciler.handle(&body, signature).await?;
    debug!("Webhook reconciled: {:?}", outcome);
    Ok(Json(json!({ "received": true })))
}
