use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;
use wayfarer_booking::orchestrator::{CreateBookingRequest, VerifyPaymentRequest};
use wayfarer_booking::reconciliation::ReconcileOutcome;
use wayfarer_booking::refund::CancelRequest;
use wayfarer_booking::{
    BookingContext, BookingError, BookingOrchestrator, BookingRules, MockPaymentGateway,
    PayoutProcessor, RefundEngine, WebhookReconciler,
};
use wayfarer_core::payment::{
    GatewayError, GatewayOrder, OrderNotes, PaymentDetails, PaymentGateway, RefundNotes, RefundReceipt,
    RefundState, TransferNotes, TransferReceipt,
};
use wayfarer_core::signature::sign_hex;
use wayfarer_core::{
    Actor, Booking, BookingCondition, BookingPatch, BookingRepository, BookingStatus, Departure,
    DepartureRepository, PaymentStatus, PayoutStatus, Plan, PlanRepository, RefundStatus,
    StoreError, StoreResult, VendorAccount, VendorRepository,
};
use wayfarer_shared::{BookingChangeEvent, Masked};
use wayfarer_store::MemoryStore;

const WEBHOOK_SECRET: &str = "whsec_lifecycle";
const VENDOR: &str = "vendor-1";

struct Harness {
    store: Arc<MemoryStore>,
    gateway: Arc<MockPaymentGateway>,
    orchestrator: BookingOrchestrator,
    refunds: RefundEngine,
    payouts: PayoutProcessor,
    reconciler: WebhookReconciler,
    plan: Plan,
    departure: Departure,
}

async fn harness(capacity: u32, trip_in: Duration) -> Harness {
    let store = Arc::new(MemoryStore::new());
    harness_with(store.clone(), store, capacity, trip_in).await
}

async fn harness_with(
    store: Arc<MemoryStore>,
    bookings: Arc<dyn BookingRepository>,
    capacity: u32,
    trip_in: Duration,
) -> Harness {
    let gateway = Arc::new(MockPaymentGateway::default());

    let plan = Plan::new(VENDOR, "Spiti Valley Circuit", 5_000).with_vendor_cut(85);
    PlanRepository::insert(store.as_ref(), &plan).await.unwrap();
    let departure = Departure::new(plan.id, Utc::now() + trip_in, capacity);
    DepartureRepository::insert(store.as_ref(), &departure).await.unwrap();
    store
        .upsert_account(&VendorAccount {
            vendor_id: VENDOR.to_string(),
            account_id: Masked::new("acc_vendor_1".to_string()),
        })
        .await
        .unwrap();

    let ctx = BookingContext {
        plans: store.clone(),
        departures: store.clone(),
        bookings,
        vendors: store.clone(),
        gateway: gateway.clone(),
        rules: BookingRules::default(),
    };

    Harness {
        store,
        gateway,
        orchestrator: BookingOrchestrator::new(ctx.clone()),
        refunds: RefundEngine::new(ctx.clone()),
        payouts: PayoutProcessor::new(ctx.clone()),
        reconciler: WebhookReconciler::new(ctx, WEBHOOK_SECRET),
        plan,
        departure,
    }
}

impl Harness {
    fn request(&self, num_people: i64) -> CreateBookingRequest {
        CreateBookingRequest {
            plan_id: self.plan.id,
            departure_id: self.departure.id,
            num_people,
        }
    }

    async fn booking(&self, id: Uuid) -> Booking {
        BookingRepository::get(self.store.as_ref(), id).await.unwrap().unwrap()
    }

    async fn booked_seats(&self) -> u32 {
        DepartureRepository::get(self.store.as_ref(), self.departure.id)
            .await
            .unwrap()
            .unwrap()
            .booked_seats
    }

    /// Creates an order, pays it at the mock gateway and returns the
    /// verification request the widget would post.
    async fn checkout(&self, user: &Actor, booking: &Booking) -> VerifyPaymentRequest {
        let order = self.orchestrator.create_payment_order(user, booking.id).await.unwrap();
        let (payment_id, signature) = self.gateway.capture(&order.order_id).unwrap();
        VerifyPaymentRequest {
            booking_id: booking.id,
            razorpay_payment_id: payment_id,
            razorpay_order_id: order.order_id,
            razorpay_signature: signature,
        }
    }

    async fn book_and_pay(&self, user: &Actor, people: i64) -> Booking {
        let booking = self.orchestrator.create_booking(user, self.request(people)).await.unwrap();
        let verify = self.checkout(user, &booking).await;
        self.orchestrator.verify_payment(user, verify).await.unwrap();
        self.booking(booking.id).await
    }

    async fn webhook(&self, body: serde_json::Value) -> Result<ReconcileOutcome, BookingError> {
        let raw = serde_json::to_vec(&body).unwrap();
        let signature = sign_hex(WEBHOOK_SECRET, &raw);
        self.reconciler.handle(&raw, Some(&signature)).await
    }
}

fn payment_event(event: &str, payment_id: &str, order_id: &str, amount_minor: i64) -> serde_json::Value {
    serde_json::json!({
        "event": event,
        "payload": {
            "payment": {
                "entity": {
                    "id": payment_id,
                    "order_id": order_id,
                    "amount": amount_minor,
                    "status": if event == "payment.failed" { "failed" } else { "captured" },
                }
            }
        }
    })
}

fn refund_event(event: &str, refund_id: &str, payment_id: &str, amount_minor: i64) -> serde_json::Value {
    serde_json::json!({
        "event": event,
        "payload": {
            "refund": {
                "entity": {
                    "id": refund_id,
                    "payment_id": payment_id,
                    "amount": amount_minor,
                    "status": "processed",
                }
            }
        }
    })
}

#[tokio::test]
async fn test_full_departure_rejects_booking_without_side_effects() {
    let h = harness(5, Duration::days(30)).await;
    h.store.reserve(h.departure.id, 5).await.unwrap();
    let user = Actor::user("user-1");

    let err = h.orchestrator.create_booking(&user, h.request(1)).await.unwrap_err();

    assert!(matches!(err, BookingError::CapacityExceeded { requested: 1, available: 0 }));
    assert_eq!(h.booked_seats().await, 5);
    assert!(h.orchestrator.list_bookings(&user).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_people_count_is_validated() {
    let h = harness(20, Duration::days(30)).await;
    let user = Actor::user("user-1");

    for people in [0, -1, 11] {
        let err = h.orchestrator.create_booking(&user, h.request(people)).await.unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)), "{} people", people);
    }
    assert_eq!(h.booked_seats().await, 0);
}

#[tokio::test]
async fn test_pricing_is_stored_on_the_booking() {
    let h = harness(10, Duration::days(30)).await;
    let booking = h
        .orchestrator
        .create_booking(&Actor::user("user-1"), h.request(2))
        .await
        .unwrap();

    assert_eq!(booking.trip_cost, 10_000);
    assert_eq!(booking.platform_cut, 1_500);
    assert_eq!(booking.vendor_payout_amount, Some(8_500));
    assert_eq!(booking.total_amount, 10_000);
    assert_eq!(booking.booking_status, BookingStatus::Pending);
    assert_eq!(h.booked_seats().await, 2);
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Fault {
    Insert,
    Confirm,
}

/// Delegates to the memory store but fails one kind of write.
struct FaultyBookings {
    store: Arc<MemoryStore>,
    fault: Fault,
}

impl FaultyBookings {
    fn new(store: Arc<MemoryStore>, fault: Fault) -> Arc<Self> {
        Arc::new(Self { store, fault })
    }

    fn outage() -> StoreError {
        StoreError::Backend("connection reset".to_string())
    }
}

#[async_trait]
impl BookingRepository for FaultyBookings {
    async fn create(&self, booking: &Booking) -> StoreResult<()> {
        if self.fault == Fault::Insert {
            return Err(Self::outage());
        }
        self.store.create(booking).await
    }
    async fn get(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        BookingRepository::get(self.store.as_ref(), id).await
    }
    async fn list_by_user(&self, user_id: &str) -> StoreResult<Vec<Booking>> {
        self.store.list_by_user(user_id).await
    }
    async fn find_by_payment_id(&self, payment_id: &str) -> StoreResult<Option<Booking>> {
        self.store.find_by_payment_id(payment_id).await
    }
    async fn find_by_order_id(&self, order_id: &str) -> StoreResult<Option<Booking>> {
        self.store.find_by_order_id(order_id).await
    }
    async fn update(&self, id: Uuid, patch: &BookingPatch) -> StoreResult<Booking> {
        self.store.update(id, patch).await
    }
    async fn update_if(&self, id: Uuid, condition: &BookingCondition, patch: &BookingPatch) -> StoreResult<Option<Booking>> {
        if self.fault == Fault::Confirm && patch.booking_status == Some(BookingStatus::Confirmed) {
            return Err(Self::outage());
        }
        self.store.update_if(id, condition, patch).await
    }
    async fn record_change(&self, change: &BookingChangeEvent) -> StoreResult<()> {
        self.store.record_change(change).await
    }
    async fn list_changes(&self, booking_id: Uuid) -> StoreResult<Vec<BookingChangeEvent>> {
        self.store.list_changes(booking_id).await
    }
}

#[tokio::test]
async fn test_failed_insert_releases_reserved_seats() {
    let store = Arc::new(MemoryStore::new());
    let bookings = FaultyBookings::new(store.clone(), Fault::Insert);
    let h = harness_with(store, bookings, 4, Duration::days(30)).await;

    let err = h
        .orchestrator
        .create_booking(&Actor::user("user-1"), h.request(3))
        .await
        .unwrap_err();

    assert!(matches!(err, BookingError::Persistence(_)));
    assert_eq!(h.booked_seats().await, 0);
}

#[tokio::test]
async fn test_unsaved_confirmation_refunds_and_frees_seats() {
    let store = Arc::new(MemoryStore::new());
    let bookings = FaultyBookings::new(store.clone(), Fault::Confirm);
    let h = harness_with(store, bookings, 10, Duration::days(30)).await;
    let user = Actor::user("user-1");
    let booking = h.orchestrator.create_booking(&user, h.request(2)).await.unwrap();
    let verify = h.checkout(&user, &booking).await;

    let err = h.orchestrator.verify_payment(&user, verify.clone()).await.unwrap_err();

    match err {
        BookingError::PaymentRefunded { payment_id, .. } => assert_eq!(payment_id, verify.razorpay_payment_id),
        other => panic!("expected PaymentRefunded, got {}", other),
    }
    let stored = h.booking(booking.id).await;
    assert_eq!(stored.booking_status, BookingStatus::Failed);
    assert_eq!(stored.payment_status, PaymentStatus::Completed);
    assert_eq!(stored.refund_status, RefundStatus::Completed);
    assert_eq!(h.booked_seats().await, 0);
    assert_eq!(h.gateway.refunds().len(), 1);

    // Nothing is left holding the booking open.
    let abandoned = h.orchestrator.abandon_booking(&user, booking.id).await.unwrap();
    assert_eq!(abandoned.booking_status, BookingStatus::Failed);
    let cancel = h.refunds.cancel(&user, booking.id, CancelRequest::default()).await.unwrap_err();
    assert!(matches!(cancel, BookingError::StateConflict(_)));
    assert_eq!(h.booked_seats().await, 0);
}

#[tokio::test]
async fn test_concurrent_bookings_never_overbook() {
    let h = Arc::new(harness(3, Duration::days(30)).await);

    let mut handles = Vec::new();
    for i in 0..8 {
        let h = h.clone();
        handles.push(tokio::spawn(async move {
            let user = Actor::user(format!("user-{}", i));
            h.orchestrator.create_booking(&user, h.request(1)).await
        }));
    }

    let mut confirmed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => confirmed += 1,
            Err(BookingError::CapacityExceeded { .. }) => {}
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(confirmed, 3);
    assert_eq!(h.booked_seats().await, 3);
}

#[tokio::test]
async fn test_payment_order_is_reused() {
    let h = harness(10, Duration::days(30)).await;
    let user = Actor::user("user-1");
    let booking = h.orchestrator.create_booking(&user, h.request(2)).await.unwrap();

    let first = h.orchestrator.create_payment_order(&user, booking.id).await.unwrap();
    let second = h.orchestrator.create_payment_order(&user, booking.id).await.unwrap();

    assert_eq!(first.order_id, second.order_id);
    assert_eq!(first.amount, 1_000_000);
    assert_eq!(first.currency, "INR");
    assert_eq!(first.key, "rzp_test_mock");
    assert_eq!(h.gateway.order_count(), 1);

    let stranger = Actor::user("user-2");
    let err = h.orchestrator.create_payment_order(&stranger, booking.id).await.unwrap_err();
    assert!(matches!(err, BookingError::Forbidden(_)));
}

#[tokio::test]
async fn test_verify_and_webhook_converge() {
    let h = harness(10, Duration::days(30)).await;
    let user = Actor::user("user-1");
    let booking = h.orchestrator.create_booking(&user, h.request(2)).await.unwrap();
    let verify = h.checkout(&user, &booking).await;
    let payment_id = verify.razorpay_payment_id.clone();
    let order_id = verify.razorpay_order_id.clone();

    // Webhook arrives before the client callback; only the order id is known.
    let outcome = h
        .webhook(payment_event("payment.captured", &payment_id, &order_id, 1_000_000))
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Applied);

    let verified = h.orchestrator.verify_payment(&user, verify.clone()).await.unwrap();
    assert!(verified.already_confirmed);

    let replay = h
        .webhook(payment_event("payment.captured", &payment_id, &order_id, 1_000_000))
        .await
        .unwrap();
    assert_eq!(replay, ReconcileOutcome::AlreadyApplied);

    let again = h.orchestrator.verify_payment(&user, verify).await.unwrap();
    assert!(again.already_confirmed);

    let stored = h.booking(booking.id).await;
    assert!(stored.is_confirmed_and_paid());
    assert_eq!(stored.gateway_payment_id.as_deref(), Some(payment_id.as_str()));
    assert_eq!(h.booked_seats().await, 2);
}

#[tokio::test]
async fn test_verify_rejects_bad_signature_without_mutation() {
    let h = harness(10, Duration::days(30)).await;
    let user = Actor::user("user-1");
    let booking = h.orchestrator.create_booking(&user, h.request(1)).await.unwrap();
    let mut verify = h.checkout(&user, &booking).await;
    verify.razorpay_signature = "0".repeat(64);

    let err = h.orchestrator.verify_payment(&user, verify).await.unwrap_err();

    assert!(matches!(err, BookingError::InvalidSignature));
    let stored = h.booking(booking.id).await;
    assert_eq!(stored.booking_status, BookingStatus::Pending);
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
    assert!(stored.gateway_payment_id.is_none());
}

#[tokio::test]
async fn test_payment_failed_webhook_releases_seats_once() {
    let h = harness(10, Duration::days(30)).await;
    let user = Actor::user("user-1");
    let kept = h.orchestrator.create_booking(&Actor::user("user-2"), h.request(2)).await.unwrap();
    let booking = h.orchestrator.create_booking(&user, h.request(2)).await.unwrap();
    let order = h.orchestrator.create_payment_order(&user, booking.id).await.unwrap();
    h.store
        .update(
            booking.id,
            &BookingPatch {
                gateway_payment_id: Some("pay_failed_1".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(h.booked_seats().await, 4);

    let event = payment_event("payment.failed", "pay_failed_1", &order.order_id, 1_000_000);
    assert_eq!(h.webhook(event.clone()).await.unwrap(), ReconcileOutcome::Applied);
    assert_eq!(h.webhook(event).await.unwrap(), ReconcileOutcome::AlreadyApplied);

    let failed = h.booking(booking.id).await;
    assert_eq!(failed.booking_status, BookingStatus::Failed);
    assert_eq!(failed.payment_status, PaymentStatus::Failed);
    assert_eq!(h.booked_seats().await, 2);
    assert_eq!(h.booking(kept.id).await.booking_status, BookingStatus::Pending);
}

#[tokio::test]
async fn test_declined_attempt_does_not_block_retry() {
    let h = harness(10, Duration::days(30)).await;
    let user = Actor::user("user-1");
    let booking = h.orchestrator.create_booking(&user, h.request(2)).await.unwrap();
    let order = h.orchestrator.create_payment_order(&user, booking.id).await.unwrap();

    // First card is declined on the same order.
    let declined = h
        .webhook(payment_event("payment.failed", "pay_attempt_1", &order.order_id, 1_000_000))
        .await
        .unwrap();
    assert_eq!(declined, ReconcileOutcome::BookingNotFound);
    assert_eq!(h.booking(booking.id).await.booking_status, BookingStatus::Pending);
    assert_eq!(h.booked_seats().await, 2);

    let retry = h.checkout(&user, &booking).await;
    assert_eq!(retry.razorpay_order_id, order.order_id);
    let verified = h.orchestrator.verify_payment(&user, retry.clone()).await.unwrap();

    assert!(!verified.already_confirmed);
    let stored = h.booking(booking.id).await;
    assert!(stored.is_confirmed_and_paid());
    assert_eq!(stored.gateway_payment_id.as_deref(), Some(retry.razorpay_payment_id.as_str()));
    assert!(h.gateway.refunds().is_empty());
    assert_eq!(h.booked_seats().await, 2);
}

#[tokio::test]
async fn test_late_verify_on_abandoned_booking_refunds_customer() {
    let h = harness(10, Duration::days(30)).await;
    let user = Actor::user("user-1");
    let booking = h.orchestrator.create_booking(&user, h.request(2)).await.unwrap();
    let verify = h.checkout(&user, &booking).await;
    h.orchestrator.abandon_booking(&user, booking.id).await.unwrap();

    let err = h.orchestrator.verify_payment(&user, verify.clone()).await.unwrap_err();

    match err {
        BookingError::PaymentRefunded { payment_id, .. } => assert_eq!(payment_id, verify.razorpay_payment_id),
        other => panic!("expected PaymentRefunded, got {}", other),
    }
    let refunds = h.gateway.refunds();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].amount, 10_000);
    assert!(refunds[0].booking_failure);

    let stored = h.booking(booking.id).await;
    assert_eq!(stored.booking_status, BookingStatus::Cancelled);
    assert_eq!(stored.refund_status, RefundStatus::Completed);
    assert_eq!(h.booked_seats().await, 0);

    // A second attempt must not refund twice.
    let again = h.orchestrator.verify_payment(&user, verify).await.unwrap_err();
    assert!(matches!(again, BookingError::PaymentRefunded { .. }));
    assert_eq!(h.gateway.refunds().len(), 1);
}

#[tokio::test]
async fn test_failed_compensation_reports_payment_id() {
    let h = harness(10, Duration::days(30)).await;
    let user = Actor::user("user-1");
    let booking = h.orchestrator.create_booking(&user, h.request(1)).await.unwrap();
    let verify = h.checkout(&user, &booking).await;
    h.orchestrator.abandon_booking(&user, booking.id).await.unwrap();
    h.gateway.fail_refunds(true);

    let err = h.orchestrator.verify_payment(&user, verify.clone()).await.unwrap_err();

    match err {
        BookingError::CompensationFailed { payment_id, .. } => assert_eq!(payment_id, verify.razorpay_payment_id),
        other => panic!("expected CompensationFailed, got {}", other),
    }
    assert_eq!(h.booking(booking.id).await.refund_status, RefundStatus::Rejected);
}

#[tokio::test]
async fn test_abandon_releases_seats_and_is_idempotent() {
    let h = harness(10, Duration::days(30)).await;
    let user = Actor::user("user-1");
    let booking = h.orchestrator.create_booking(&user, h.request(3)).await.unwrap();

    let first = h.orchestrator.abandon_booking(&user, booking.id).await.unwrap();
    let second = h.orchestrator.abandon_booking(&user, booking.id).await.unwrap();

    assert_eq!(first.booking_status, BookingStatus::Cancelled);
    assert_eq!(second.booking_status, BookingStatus::Cancelled);
    assert_eq!(first.payment_status, PaymentStatus::Failed);
    assert_eq!(h.booked_seats().await, 0);

    let changes = h.store.list_changes(booking.id).await.unwrap();
    assert_eq!(changes.iter().filter(|c| c.action == "abandoned").count(), 1);
}

#[tokio::test]
async fn test_cancel_ten_days_out_refunds_half() {
    let h = harness(10, Duration::days(10)).await;
    let user = Actor::user("user-1");
    let booking = h.book_and_pay(&user, 2).await;
    assert_eq!(h.booked_seats().await, 2);

    let outcome = h.refunds.cancel(&user, booking.id, CancelRequest::default()).await.unwrap();

    assert_eq!(outcome.refund_percentage, 50);
    assert_eq!(outcome.refund_amount, 5_000);
    assert_eq!(outcome.vendor_payout_amount, 4_250);
    assert_eq!(outcome.refund_status, RefundStatus::Completed);

    let stored = h.booking(booking.id).await;
    assert_eq!(stored.booking_status, BookingStatus::Cancelled);
    assert_eq!(stored.refund_amount, Some(5_000));
    assert_eq!(stored.vendor_payout_amount, Some(4_250));
    assert!(stored.refund_date.is_some());
    assert_eq!(h.booked_seats().await, 0);
    assert_eq!(h.gateway.refunds()[0].amount, 5_000);

    let err = h.refunds.cancel(&user, booking.id, CancelRequest::default()).await.unwrap_err();
    assert!(matches!(err, BookingError::StateConflict(_)));
    assert_eq!(h.booked_seats().await, 0);
}

#[tokio::test]
async fn test_vendor_cancellation_refunds_everything() {
    let h = harness(10, Duration::days(3)).await;
    let user = Actor::user("user-1");
    let booking = h.book_and_pay(&user, 2).await;

    let outcome = h
        .refunds
        .cancel(&Actor::vendor(VENDOR), booking.id, CancelRequest::default())
        .await
        .unwrap();

    assert_eq!(outcome.refund_percentage, 100);
    assert_eq!(outcome.refund_amount, 10_000);
    assert_eq!(outcome.vendor_payout_amount, 0);

    let err = h.payouts.process_payout(&Actor::admin("ops"), booking.id).await.unwrap_err();
    assert!(matches!(err, BookingError::StateConflict(_)));
}

#[tokio::test]
async fn test_customer_cannot_claim_vendor_cancellation() {
    let h = harness(10, Duration::days(3)).await;
    let user = Actor::user("user-1");
    let booking = h.book_and_pay(&user, 1).await;

    let req = CancelRequest { vendor_cancellation: true, ..CancelRequest::default() };
    let err = h.refunds.cancel(&user, booking.id, req).await.unwrap_err();

    assert!(matches!(err, BookingError::Forbidden(_)));
    assert!(h.booking(booking.id).await.is_confirmed_and_paid());
}

#[tokio::test]
async fn test_late_cancellation_leaves_vendor_payable() {
    let h = harness(10, Duration::days(5)).await;
    let user = Actor::user("user-1");
    let booking = h.book_and_pay(&user, 2).await;

    let live = h.refunds.refund(&user, booking.id).await.unwrap_err();
    assert!(matches!(live, BookingError::Validation(_)));

    let outcome = h.refunds.cancel(&user, booking.id, CancelRequest::default()).await.unwrap();
    assert_eq!(outcome.refund_amount, 0);
    assert_eq!(outcome.refund_status, RefundStatus::None);
    assert_eq!(outcome.vendor_payout_amount, 8_500);

    let finalized = h.refunds.refund(&user, booking.id).await.unwrap();
    assert_eq!(finalized.refund_amount, 0);
    assert!(h.gateway.refunds().is_empty());

    let payout = h.payouts.process_payout(&Actor::admin("ops"), booking.id).await.unwrap();
    assert_eq!(payout.payout_amount, 8_500);
    assert_eq!(h.gateway.transfers()[0].account_id, "acc_vendor_1");
}

#[tokio::test]
async fn test_refund_blocked_after_payout() {
    let h = harness(10, Duration::days(30)).await;
    let user = Actor::user("user-1");
    let booking = h.book_and_pay(&user, 2).await;

    let payout = h.payouts.process_payout(&Actor::admin("ops"), booking.id).await.unwrap();
    assert_eq!(payout.payout_amount, 8_500);
    assert_eq!(h.booking(booking.id).await.vendor_payout_status, PayoutStatus::Completed);

    let refund = h.refunds.refund(&user, booking.id).await.unwrap_err();
    assert!(matches!(refund, BookingError::StateConflict(_)));
    let cancel = h.refunds.cancel(&user, booking.id, CancelRequest::default()).await.unwrap_err();
    assert!(matches!(cancel, BookingError::StateConflict(_)));
    assert!(h.gateway.refunds().is_empty());
}

#[tokio::test]
async fn test_payout_blocked_while_refund_processing() {
    let h = harness(10, Duration::days(30)).await;
    let user = Actor::user("user-1");
    let booking = h.book_and_pay(&user, 2).await;
    h.gateway.set_refund_state(RefundState::Pending);

    let outcome = h.refunds.cancel(&user, booking.id, CancelRequest::default()).await.unwrap();
    assert_eq!(outcome.refund_status, RefundStatus::Processing);

    let err = h.payouts.process_payout(&Actor::admin("ops"), booking.id).await.unwrap_err();
    assert!(matches!(err, BookingError::StateConflict(_)));
    assert!(h.gateway.transfers().is_empty());

    // Provider settles the refund asynchronously.
    let stored = h.booking(booking.id).await;
    let refund_id = stored.refund_id.clone().unwrap();
    let payment_id = stored.gateway_payment_id.clone().unwrap();
    let applied = h
        .webhook(refund_event("refund.processed", &refund_id, &payment_id, 1_000_000))
        .await
        .unwrap();
    assert_eq!(applied, ReconcileOutcome::Applied);

    let settled = h.booking(booking.id).await;
    assert_eq!(settled.refund_status, RefundStatus::Completed);
    assert!(settled.refund_date.is_some());

    // A late failure notice must not undo a completed refund.
    let late = h
        .webhook(refund_event("refund.failed", &refund_id, &payment_id, 1_000_000))
        .await
        .unwrap();
    assert_eq!(late, ReconcileOutcome::AlreadyApplied);
    assert_eq!(h.booking(booking.id).await.refund_status, RefundStatus::Completed);
}

/// Mock gateway whose refund webhook is delivered before the refund call returns.
struct WebhookFirstGateway {
    inner: Arc<MockPaymentGateway>,
    reconciler: WebhookReconciler,
}

#[async_trait]
impl PaymentGateway for WebhookFirstGateway {
    fn key_id(&self) -> &str {
        self.inner.key_id()
    }
    async fn create_order(&self, amount: i64, currency: &str, receipt: &str, notes: &OrderNotes) -> Result<GatewayOrder, GatewayError> {
        self.inner.create_order(amount, currency, receipt, notes).await
    }
    fn verify_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        self.inner.verify_signature(order_id, payment_id, signature)
    }
    async fn payment_details(&self, payment_id: &str) -> Result<PaymentDetails, GatewayError> {
        self.inner.payment_details(payment_id).await
    }
    async fn refund(&self, payment_id: &str, amount: i64, notes: &RefundNotes) -> Result<RefundReceipt, GatewayError> {
        let receipt = self.inner.refund(payment_id, amount, notes).await?;
        let body = serde_json::to_vec(&refund_event("refund.processed", &receipt.id, payment_id, receipt.amount_minor)).unwrap();
        let outcome = self.reconciler.handle(&body, Some(&sign_hex(WEBHOOK_SECRET, &body))).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Applied);
        Ok(receipt)
    }
    async fn transfer_to_vendor(&self, account_id: &str, amount: i64, currency: &str, notes: &TransferNotes) -> Result<TransferReceipt, GatewayError> {
        self.inner.transfer_to_vendor(account_id, amount, currency, notes).await
    }
}

#[tokio::test]
async fn test_refund_settled_by_webhook_is_not_regressed() {
    let h = harness(10, Duration::days(30)).await;
    let user = Actor::user("user-1");
    let booking = h.book_and_pay(&user, 2).await;
    h.gateway.set_refund_state(RefundState::Pending);

    let ctx = BookingContext {
        plans: h.store.clone(),
        departures: h.store.clone(),
        bookings: h.store.clone(),
        vendors: h.store.clone(),
        gateway: Arc::new(WebhookFirstGateway { inner: h.gateway.clone(), reconciler: h.reconciler.clone() }),
        rules: BookingRules::default(),
    };
    let refunds = RefundEngine::new(ctx);

    let outcome = refunds.cancel(&user, booking.id, CancelRequest::default()).await.unwrap();

    assert_eq!(outcome.refund_amount, 10_000);
    assert_eq!(outcome.refund_status, RefundStatus::Completed);
    let stored = h.booking(booking.id).await;
    assert_eq!(stored.refund_status, RefundStatus::Completed);
    assert!(stored.refund_date.is_some());
    assert_eq!(stored.refund_id, outcome.refund_id);
    assert_eq!(h.gateway.refunds().len(), 1);
}

#[tokio::test]
async fn test_gateway_refund_failure_is_recorded_and_retryable() {
    let h = harness(10, Duration::days(10)).await;
    let user = Actor::user("user-1");
    let booking = h.book_and_pay(&user, 2).await;
    h.gateway.fail_refunds(true);

    let outcome = h.refunds.cancel(&user, booking.id, CancelRequest::default()).await.unwrap();
    assert_eq!(outcome.refund_status, RefundStatus::Rejected);

    let stored = h.booking(booking.id).await;
    assert_eq!(stored.booking_status, BookingStatus::Cancelled);
    assert_eq!(stored.refund_status, RefundStatus::Rejected);
    assert_eq!(h.booked_seats().await, 0);

    h.gateway.fail_refunds(false);
    let retried = h.refunds.refund(&user, booking.id).await.unwrap();
    assert_eq!(retried.refund_amount, 5_000);
    assert_eq!(retried.refund_status, RefundStatus::Completed);
}

#[tokio::test]
async fn test_payout_failure_marks_failed_and_retry_succeeds() {
    let h = harness(10, Duration::days(30)).await;
    let user = Actor::user("user-1");
    let booking = h.book_and_pay(&user, 1).await;
    let admin = Actor::admin("ops");
    h.gateway.fail_transfers(true);

    let err = h.payouts.process_payout(&admin, booking.id).await.unwrap_err();
    assert!(matches!(err, BookingError::Gateway(_)));
    assert_eq!(h.booking(booking.id).await.vendor_payout_status, PayoutStatus::Failed);

    h.gateway.fail_transfers(false);
    let payout = h.payouts.process_payout(&admin, booking.id).await.unwrap();
    assert_eq!(payout.payout_amount, 4_250);

    let stored = h.booking(booking.id).await;
    assert_eq!(stored.vendor_payout_status, PayoutStatus::Completed);
    assert_eq!(stored.transfer_id.as_deref(), Some(payout.transfer_id.as_str()));
}

#[tokio::test]
async fn test_vendor_payout_waits_for_trip_start() {
    let h = harness(10, Duration::days(30)).await;
    let booking = h.book_and_pay(&Actor::user("user-1"), 1).await;

    let early = h.payouts.process_payout(&Actor::vendor(VENDOR), booking.id).await.unwrap_err();
    assert!(matches!(early, BookingError::Forbidden(_)));

    let other = h.payouts.process_payout(&Actor::vendor("vendor-2"), booking.id).await.unwrap_err();
    assert!(matches!(other, BookingError::Forbidden(_)));
}

#[tokio::test]
async fn test_signed_unreadable_webhook_is_acknowledged() {
    let h = harness(10, Duration::days(30)).await;

    let garbage = b"{\"event\": \"payment.captured\", \"payload\":";
    let signature = sign_hex(WEBHOOK_SECRET, garbage);
    let outcome = h.reconciler.handle(garbage, Some(&signature)).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Ignored);

    let no_entity = h.webhook(serde_json::json!({"event": "payment.captured", "payload": {}})).await.unwrap();
    assert_eq!(no_entity, ReconcileOutcome::Ignored);

    let wrong_entity = h
        .webhook(payment_event("refund.processed", "pay_1", "order_1", 100))
        .await
        .unwrap();
    assert_eq!(wrong_entity, ReconcileOutcome::Ignored);
}

#[tokio::test]
async fn test_webhook_signature_is_enforced() {
    let h = harness(10, Duration::days(30)).await;
    let body = serde_json::to_vec(&payment_event("payment.captured", "pay_1", "order_1", 100)).unwrap();

    let missing = h.reconciler.handle(&body, None).await.unwrap_err();
    assert!(matches!(missing, BookingError::InvalidSignature));

    let forged = sign_hex("not-the-secret", &body);
    let wrong = h.reconciler.handle(&body, Some(&forged)).await.unwrap_err();
    assert!(matches!(wrong, BookingError::InvalidSignature));

    let unknown = h
        .webhook(payment_event("payment.captured", "pay_1", "order_1", 100))
        .await
        .unwrap();
    assert_eq!(unknown, ReconcileOutcome::BookingNotFound);

    let other = h.webhook(serde_json::json!({"event": "order.paid", "payload": {}})).await.unwrap();
    assert_eq!(other, ReconcileOutcome::Ignored);
}
