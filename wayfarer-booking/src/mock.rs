use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use wayfarer_core::payment::{
    to_minor_units, GatewayError, GatewayOrder, GatewayPaymentState, OrderNotes, PaymentDetails,
    PaymentGateway, RefundNotes, RefundReceipt, RefundState, TransferNotes, TransferReceipt,
};
use wayfarer_core::signature::{checkout_payload, sign_hex, verify_hex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRefund {
    pub payment_id: String,
    pub amount: i64,
    pub booking_failure: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockTransfer {
    pub account_id: String,
    pub amount: i64,
}

#[derive(Default)]
struct MockState {
    sequence: u64,
    orders: HashMap<String, GatewayOrder>,
    receipts: HashMap<String, String>,
    payments: HashMap<String, PaymentDetails>,
    refunds: Vec<MockRefund>,
    transfers: Vec<MockTransfer>,
    fail_refunds: bool,
    fail_transfers: bool,
    refund_state: Option<RefundState>,
}

impl MockState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.sequence += 1;
        format!("{}_mock{:06}", prefix, self.sequence)
    }
}

/// In-process gateway for development and tests.
///
/// Signs with a real key secret so checkout signatures go through the same
/// HMAC check as production. Refunds are `processed` immediately unless told
/// otherwise.
pub struct MockPaymentGateway {
    key_id: String,
    key_secret: String,
    state: Mutex<MockState>,
}

impl Default for MockPaymentGateway {
    fn default() -> Self {
        Self::new("rzp_test_mock", "mock_key_secret")
    }
}

impl MockPaymentGateway {
    pub fn new(key_id: impl Into<String>, key_secret: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            key_secret: key_secret.into(),
            state: Mutex::new(MockState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Checkout signature the widget would hand back for this pair.
    pub fn sign(&self, order_id: &str, payment_id: &str) -> String {
        sign_hex(&self.key_secret, checkout_payload(order_id, payment_id).as_bytes())
    }

    /// Simulates the customer paying an order in full. Returns the payment id
    /// and its checkout signature.
    pub fn capture(&self, order_id: &str) -> Option<(String, String)> {
        let mut state = self.state();
        let amount_minor = state.orders.get(order_id)?.amount_minor;
        let currency = state.orders.get(order_id)?.currency.clone();
        let payment_id = state.next_id("pay");
        state.payments.insert(
            payment_id.clone(),
            PaymentDetails {
                id: payment_id.clone(),
                order_id: Some(order_id.to_string()),
                status: GatewayPaymentState::Captured,
                amount_minor,
                currency,
            },
        );
        drop(state);
        let signature = self.sign(order_id, &payment_id);
        Some((payment_id, signature))
    }

    pub fn register_payment(&self, details: PaymentDetails) {
        self.state().payments.insert(details.id.clone(), details);
    }

    pub fn fail_refunds(&self, fail: bool) {
        self.state().fail_refunds = fail;
    }

    pub fn fail_transfers(&self, fail: bool) {
        self.state().fail_transfers = fail;
    }

    /// Status reported for subsequent refunds.
    pub fn set_refund_state(&self, refund_state: RefundState) {
        self.state().refund_state = Some(refund_state);
    }

    pub fn refunds(&self) -> Vec<MockRefund> {
        self.state().refunds.clone()
    }

    pub fn transfers(&self) -> Vec<MockTransfer> {
        self.state().transfers.clone()
    }

    pub fn order_count(&self) -> usize {
        self.state().orders.len()
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
        _notes: &OrderNotes,
    ) -> Result<GatewayOrder, GatewayError> {
        if amount <= 0 {
            return Err(GatewayError::Rejected { status: 400, message: "amount must be positive".to_string() });
        }
        let mut state = self.state();
        if let Some(existing) = state.receipts.get(receipt).and_then(|id| state.orders.get(id)) {
            return Ok(existing.clone());
        }
        let order = GatewayOrder {
            id: state.next_id("order"),
            amount_minor: to_minor_units(amount),
            currency: currency.to_string(),
            receipt: receipt.to_string(),
        };
        state.receipts.insert(receipt.to_string(), order.id.clone());
        state.orders.insert(order.id.clone(), order.clone());
        Ok(order)
    }

    fn verify_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        verify_hex(&self.key_secret, checkout_payload(order_id, payment_id).as_bytes(), signature)
    }

    async fn payment_details(&self, payment_id: &str) -> Result<PaymentDetails, GatewayError> {
        self.state()
            .payments
            .get(payment_id)
            .cloned()
            .ok_or_else(|| GatewayError::Rejected { status: 404, message: format!("payment {} not found", payment_id) })
    }

    async fn refund(&self, payment_id: &str, amount: i64, notes: &RefundNotes) -> Result<RefundReceipt, GatewayError> {
        let mut state = self.state();
        if state.fail_refunds {
            return Err(GatewayError::Transport("simulated refund outage".to_string()));
        }
        state.refunds.push(MockRefund {
            payment_id: payment_id.to_string(),
            amount,
            booking_failure: notes.booking_failure,
        });
        Ok(RefundReceipt {
            id: state.next_id("rfnd"),
            status: state.refund_state.unwrap_or(RefundState::Processed),
            amount_minor: to_minor_units(amount),
        })
    }

    async fn transfer_to_vendor(
        &self,
        account_id: &str,
        amount: i64,
        _currency: &str,
        _notes: &TransferNotes,
    ) -> Result<TransferReceipt, GatewayError> {
        let mut state = self.state();
        if state.fail_transfers {
            return Err(GatewayError::Transport("simulated transfer outage".to_string()));
        }
        state.transfers.push(MockTransfer { account_id: account_id.to_string(), amount });
        Ok(TransferReceipt { id: state.next_id("trf"), amount_minor: to_minor_units(amount) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn notes() -> OrderNotes {
        OrderNotes {
            booking_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            departure_id: Uuid::new_v4(),
            user_id: "user-1".to_string(),
            num_people: 1,
            trip_date: Utc::now(),
            trip_cost: 500,
        }
    }

    #[tokio::test]
    async fn test_orders_are_idempotent_per_receipt() {
        let gateway = MockPaymentGateway::default();
        let first = gateway.create_order(500, "INR", "booking_1", &notes()).await.unwrap();
        let second = gateway.create_order(500, "INR", "booking_1", &notes()).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.amount_minor, 50_000);
        assert_eq!(gateway.order_count(), 1);
    }

    #[tokio::test]
    async fn test_capture_produces_verifiable_signature() {
        let gateway = MockPaymentGateway::default();
        let order = gateway.create_order(500, "INR", "booking_2", &notes()).await.unwrap();
        let (payment_id, signature) = gateway.capture(&order.id).unwrap();

        assert!(gateway.verify_signature(&order.id, &payment_id, &signature));
        assert!(!gateway.verify_signature(&order.id, &payment_id, "deadbeef"));

        let details = gateway.payment_details(&payment_id).await.unwrap();
        assert!(details.status.is_successful());
        assert_eq!(details.amount_minor, 50_000);
    }

    #[tokio::test]
    async fn test_refund_failure_switch() {
        let gateway = MockPaymentGateway::default();
        let notes = RefundNotes { booking_id: Uuid::new_v4(), reason: "test".to_string(), booking_failure: false };

        gateway.fail_refunds(true);
        assert!(gateway.refund("pay_1", 100, &notes).await.is_err());
        assert!(gateway.refunds().is_empty());

        gateway.fail_refunds(false);
        let receipt = gateway.refund("pay_1", 100, &notes).await.unwrap();
        assert_eq!(receipt.status, RefundState::Processed);
        assert_eq!(gateway.refunds().len(), 1);
    }
}
