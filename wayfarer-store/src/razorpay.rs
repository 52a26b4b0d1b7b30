use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};
use wayfarer_core::payment::{
    to_minor_units, GatewayError, GatewayOrder, GatewayPaymentState, OrderNotes, PaymentDetails,
    PaymentGateway, RefundNotes, RefundReceipt, RefundState, TransferNotes, TransferReceipt,
};
use wayfarer_core::signature::{checkout_payload, verify_hex};
use wayfarer_shared::Masked;

/// Razorpay REST client. Authenticates with the key pair over basic auth.
pub struct RazorpayGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: Masked<String>,
}

#[derive(Deserialize)]
struct OrderResponse {
    id: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    receipt: Option<String>,
}

#[derive(Deserialize)]
struct PaymentResponse {
    id: String,
    order_id: Option<String>,
    status: String,
    amount: i64,
    currency: String,
}

#[derive(Deserialize)]
struct RefundResponse {
    id: String,
    status: String,
    amount: i64,
}

#[derive(Deserialize)]
struct TransferResponse {
    id: String,
    amount: i64,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

impl RazorpayGateway {
    pub fn new(base_url: &str, key_id: &str, key_secret: &str) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GatewayError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            key_id: key_id.to_string(),
            key_secret: Masked::new(key_secret.to_string()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    /// Sends a request and decodes the success body, mapping provider errors.
    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder, operation: &str) -> Result<T, GatewayError> {
        let resp = request
            .basic_auth(&self.key_id, Some(self.key_secret.expose()))
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("{}: {}", operation, e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = provider_error_message(&body);
            warn!("Gateway {} failed with HTTP {}: {}", operation, status, message);
            return Err(GatewayError::Rejected { status: status.as_u16(), message });
        }

        resp.json::<T>()
            .await
            .map_err(|e| GatewayError::Decode(format!("{}: {}", operation, e)))
    }
}

/// Pulls `error.description` out of a provider error body.
fn provider_error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => match (envelope.error.code, envelope.error.description) {
            (Some(code), Some(description)) => format!("{}: {}", code, description),
            (None, Some(description)) => description,
            (Some(code), None) => code,
            (None, None) => "unknown error".to_string(),
        },
        Err(_) if body.is_empty() => "empty response".to_string(),
        Err(_) => body.chars().take(200).collect(),
    }
}

/// Provider notes are a flat string map.
fn flatten_notes<T: Serialize>(notes: &T) -> Result<BTreeMap<String, String>, GatewayError> {
    let value = serde_json::to_value(notes).map_err(|e| GatewayError::Decode(e.to_string()))?;
    let Value::Object(fields) = value else {
        return Err(GatewayError::Decode("notes must serialize to an object".to_string()));
    };

    Ok(fields
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let text = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, text)
        })
        .collect())
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
        notes: &OrderNotes,
    ) -> Result<GatewayOrder, GatewayError> {
        let body = json!({
            "amount": to_minor_units(amount),
            "currency": currency,
            "receipt": receipt,
            "notes": flatten_notes(notes)?,
        });
        let order: OrderResponse = self.send(self.client.post(self.url("orders")).json(&body), "create_order").await?;
        debug!("Created gateway order {} for receipt {}", order.id, receipt);

        Ok(GatewayOrder {
            id: order.id,
            amount_minor: order.amount,
            currency: order.currency,
            receipt: order.receipt.unwrap_or_else(|| receipt.to_string()),
        })
    }

    fn verify_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        verify_hex(self.key_secret.expose(), checkout_payload(order_id, payment_id).as_bytes(), signature)
    }

    async fn payment_details(&self, payment_id: &str) -> Result<PaymentDetails, GatewayError> {
        let payment: PaymentResponse = self
            .send(self.client.get(self.url(&format!("payments/{}", payment_id))), "fetch_payment")
            .await?;

        Ok(PaymentDetails {
            id: payment.id,
            order_id: payment.order_id,
            status: GatewayPaymentState::from_provider(&payment.status),
            amount_minor: payment.amount,
            currency: payment.currency,
        })
    }

    async fn refund(&self, payment_id: &str, amount: i64, notes: &RefundNotes) -> Result<RefundReceipt, GatewayError> {
        let body = json!({
            "amount": to_minor_units(amount),
            "notes": flatten_notes(notes)?,
        });
        let refund: RefundResponse = self
            .send(
                self.client.post(self.url(&format!("payments/{}/refund", payment_id))).json(&body),
                "refund",
            )
            .await?;

        Ok(RefundReceipt {
            id: refund.id,
            status: RefundState::from_provider(&refund.status),
            amount_minor: refund.amount,
        })
    }

    async fn transfer_to_vendor(
        &self,
        account_id: &str,
        amount: i64,
        currency: &str,
        notes: &TransferNotes,
    ) -> Result<TransferReceipt, GatewayError> {
        let body = json!({
            "account": account_id,
            "amount": to_minor_units(amount),
            "currency": currency,
            "notes": flatten_notes(notes)?,
        });
        let transfer: TransferResponse = self
            .send(self.client.post(self.url("transfers")).json(&body), "transfer")
            .await?;

        Ok(TransferReceipt { id: transfer.id, amount_minor: transfer.amount })
    }
}
