use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Gateway request failed: {0}")]
    Transport(String),
    #[error("Gateway rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Gateway declined operation: {0}")]
    Declined(String),
    #[error("Unexpected gateway response: {0}")]
    Decode(String),
}

/// Minor units per whole unit (paise per rupee).
pub const MINOR_UNITS: i64 = 100;

/// Domain amounts are whole currency units; the gateway speaks minor units.
pub fn to_minor_units(amount: i64) -> i64 {
    amount * MINOR_UNITS
}

/// Rounds half away from zero, like the provider's dashboard does.
pub fn from_minor_units(minor: i64) -> i64 {
    let whole = minor / MINOR_UNITS;
    let rem = minor % MINOR_UNITS;
    if rem.abs() * 2 >= MINOR_UNITS {
        whole + minor.signum()
    } else {
        whole
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub receipt: String,
}

/// Payment state as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayPaymentState {
    Created,
    Authorized,
    Captured,
    Refunded,
    Failed,
    #[serde(other)]
    Unknown,
}

impl GatewayPaymentState {
    pub fn from_provider(status: &str) -> Self {
        match status {
            "created" => Self::Created,
            "authorized" => Self::Authorized,
            "captured" => Self::Captured,
            "refunded" => Self::Refunded,
            "failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// Money has been taken (or reserved for capture).
    pub fn is_successful(&self) -> bool {
        matches!(self, Self::Captured | Self::Authorized)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub id: String,
    pub order_id: Option<String>,
    pub status: GatewayPaymentState,
    pub amount_minor: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundState {
    Pending,
    Processed,
    Failed,
}

impl RefundState {
    pub fn from_provider(status: &str) -> Self {
        match status {
            "processed" => Self::Processed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub id: String,
    pub status: RefundState,
    pub amount_minor: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub id: String,
    pub amount_minor: i64,
}

// Typed metadata. Adapters flatten these into whatever key/value form the
// provider wants; nothing above the adapter builds string maps.

#[derive(Debug, Clone, Serialize)]
pub struct OrderNotes {
    pub booking_id: Uuid,
    pub plan_id: Uuid,
    pub departure_id: Uuid,
    pub user_id: String,
    pub num_people: u32,
    pub trip_date: DateTime<Utc>,
    pub trip_cost: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundNotes {
    pub booking_id: Uuid,
    pub reason: String,
    /// Set when the refund compensates a booking that never went through.
    pub booking_failure: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferNotes {
    pub booking_id: Uuid,
    pub plan_id: Uuid,
    pub vendor_id: String,
}

/// Remote payment provider. Amounts are whole currency units; implementations
/// convert to minor units at their edge.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Public key handed to the checkout widget.
    fn key_id(&self) -> &str;

    /// Create an order to pay against. Provider-idempotent per receipt, amount
    /// and currency.
    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
        notes: &OrderNotes,
    ) -> Result<GatewayOrder, GatewayError>;

    /// Local HMAC check of a checkout signature; no network call.
    fn verify_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool;

    async fn payment_details(&self, payment_id: &str) -> Result<PaymentDetails, GatewayError>;

    async fn refund(
        &self,
        payment_id: &str,
        amount: i64,
        notes: &RefundNotes,
    ) -> Result<RefundReceipt, GatewayError>;

    async fn transfer_to_vendor(
        &self,
        account_id: &str,
        amount: i64,
        currency: &str,
        notes: &TransferNotes,
    ) -> Result<TransferReceipt, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minor_unit_conversion() {
        assert_eq!(to_minor_units(10_000), 1_000_000);
        assert_eq!(from_minor_units(1_000_000), 10_000);
        assert_eq!(from_minor_units(1_049), 10);
        assert_eq!(from_minor_units(1_050), 11);
        assert_eq!(from_minor_units(0), 0);
    }

    #[test]
    fn test_payment_state_mapping() {
        assert!(GatewayPaymentState::from_provider("captured").is_successful());
        assert!(GatewayPaymentState::from_provider("authorized").is_successful());
        assert!(!GatewayPaymentState::from_provider("failed").is_successful());
        assert_eq!(GatewayPaymentState::from_provider("weird"), GatewayPaymentState::Unknown);
        assert_eq!(RefundState::from_provider("processed"), RefundState::Processed);
        assert_eq!(RefundState::from_provider("pending"), RefundState::Pending);
    }
}
