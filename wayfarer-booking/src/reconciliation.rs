use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use wayfarer_core::payment::from_minor_units;
use wayfarer_core::signature::verify_hex;
use wayfarer_core::{
    Booking, BookingCondition, BookingPatch, BookingStatus, PaymentStatus, RefundStatus,
};
use wayfarer_shared::BookingChangeEvent;

use crate::context::BookingContext;
use crate::error::{BookingError, BookingResult};

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub payload: WebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    pub payment: Option<Entity<PaymentEntity>>,
    pub refund: Option<Entity<RefundEntity>>,
}

#[derive(Debug, Deserialize)]
pub struct Entity<T> {
    pub entity: T,
}

#[derive(Debug, Deserialize)]
pub struct PaymentEntity {
    pub id: String,
    pub order_id: Option<String>,
    /// Minor units.
    pub amount: i64,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefundEntity {
    pub id: String,
    pub payment_id: String,
    /// Minor units.
    pub amount: i64,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied,
    /// Target state was already reached by the other path.
    AlreadyApplied,
    BookingNotFound,
    Ignored,
}

/// Settles bookings from signed gateway events.
///
/// Every transition is a conditional write on the current status, so replays
/// and races with the checkout callback are no-ops.
#[derive(Clone)]
pub struct WebhookReconciler {
    ctx: BookingContext,
    webhook_secret: String,
}

impl WebhookReconciler {
    pub fn new(ctx: BookingContext, webhook_secret: impl Into<String>) -> Self {
        Self { ctx, webhook_secret: webhook_secret.into() }
    }

    /// Verify the raw body against its signature header, then apply it.
    pub async fn handle(&self, body: &[u8], signature: Option<&str>) -> BookingResult<ReconcileOutcome> {
        let signature = signature.ok_or(BookingError::InvalidSignature)?;
        if !verify_hex(&self.webhook_secret, body, signature) {
            warn!("Rejected webhook with invalid signature");
            return Err(BookingError::InvalidSignature);
        }
        // Signed but unreadable: acknowledge, a retry would carry the same body.
        let event: WebhookEvent = match serde_json::from_slice(body) {
            Ok(event) => event,
            Err(e) => {
                warn!("Ignoring signed webhook with malformed payload: {}", e);
                return Ok(ReconcileOutcome::Ignored);
            }
        };
        self.apply(&event).await
    }

    pub async fn apply(&self, event: &WebhookEvent) -> BookingResult<ReconcileOutcome> {
        info!("Received webhook event {}", event.event);
        let payment = event.payload.payment.as_ref().map(|p| &p.entity);
        let refund = event.payload.refund.as_ref().map(|r| &r.entity);
        match (event.event.as_str(), payment, refund) {
            ("payment.captured", Some(payment), _) => self.payment_captured(payment).await,
            ("payment.failed", Some(payment), _) => self.payment_failed(payment).await,
            ("refund.created", _, Some(refund)) => self.refund_update(refund, RefundStatus::Processing).await,
            ("refund.processed", _, Some(refund)) => self.refund_update(refund, RefundStatus::Completed).await,
            ("refund.failed", _, Some(refund)) => self.refund_update(refund, RefundStatus::Rejected).await,
            ("payment.captured" | "payment.failed" | "refund.created" | "refund.processed" | "refund.failed", _, _) => {
                warn!("Ignoring {} without its entity", event.event);
                Ok(ReconcileOutcome::Ignored)
            }
            (other, _, _) => {
                info!("Ignoring webhook event {}", other);
                Ok(ReconcileOutcome::Ignored)
            }
        }
    }

    /// Payment id first; before verify has run only the order id is stored.
    async fn find_captured_booking(&self, payment_id: &str, order_id: Option<&str>) -> BookingResult<Option<Booking>> {
        if let Some(booking) = self.ctx.bookings.find_by_payment_id(payment_id).await? {
            return Ok(Some(booking));
        }
        match order_id {
            Some(order_id) => Ok(self.ctx.bookings.find_by_order_id(order_id).await?),
            None => Ok(None),
        }
    }

    async fn payment_captured(&self, payment: &PaymentEntity) -> BookingResult<ReconcileOutcome> {
        let Some(booking) = self.find_captured_booking(&payment.id, payment.order_id.as_deref()).await? else {
            warn!("payment.captured for unknown payment {}", payment.id);
            return Ok(ReconcileOutcome::BookingNotFound);
        };

        if booking.is_confirmed_and_paid() {
            return Ok(ReconcileOutcome::AlreadyApplied);
        }

        let paid = from_minor_units(payment.amount);
        if (paid - booking.total_amount).abs() > self.ctx.rules.amount_tolerance {
            warn!(
                "payment.captured amount {} does not match booking {} total {}",
                paid, booking.id, booking.total_amount
            );
            return Ok(ReconcileOutcome::Ignored);
        }

        match booking.booking_status {
            BookingStatus::Pending => {}
            BookingStatus::Failed | BookingStatus::Cancelled
                if booking.payment_status != PaymentStatus::Completed
                    && booking.refund_status == RefundStatus::None =>
            {
                let reason = format!("payment captured after booking was {}", booking.booking_status);
                let outcome = self.ctx.compensate_captured_payment(&booking, &payment.id, paid, &reason).await;
                warn!("Compensated late capture on booking {}: {}", booking.id, outcome);
                return Ok(ReconcileOutcome::Applied);
            }
            _ => return Ok(ReconcileOutcome::Ignored),
        }

        let condition = BookingCondition::any()
            .booking_status(&[BookingStatus::Pending])
            .payment_status(&[PaymentStatus::Pending]);
        let patch = BookingPatch {
            booking_status: Some(BookingStatus::Confirmed),
            payment_status: Some(PaymentStatus::Completed),
            gateway_payment_id: Some(payment.id.clone()),
            ..Default::default()
        };

        match self.ctx.bookings.update_if(booking.id, &condition, &patch).await? {
            Some(confirmed) => {
                self.ctx
                    .audit(
                        BookingChangeEvent::new(confirmed.id, "payment_captured", "webhook")
                            .transition(BookingStatus::Pending, BookingStatus::Confirmed)
                            .note(payment.id.clone()),
                    )
                    .await;
                info!("Booking {} confirmed by webhook", confirmed.id);
                Ok(ReconcileOutcome::Applied)
            }
            None => Ok(ReconcileOutcome::AlreadyApplied),
        }
    }

    async fn payment_failed(&self, payment: &PaymentEntity) -> BookingResult<ReconcileOutcome> {
        // Payment id only. A declined attempt leaves the order open for a retry,
        // so the order id alone never fails a booking.
        let Some(booking) = self.ctx.bookings.find_by_payment_id(&payment.id).await? else {
            info!("payment.failed for payment {} not attached to any booking", payment.id);
            return Ok(ReconcileOutcome::BookingNotFound);
        };

        if booking.booking_status != BookingStatus::Pending {
            return Ok(if booking.booking_status == BookingStatus::Failed {
                ReconcileOutcome::AlreadyApplied
            } else {
                ReconcileOutcome::Ignored
            });
        }

        let condition = BookingCondition::any()
            .booking_status(&[BookingStatus::Pending])
            .payment_status(&[PaymentStatus::Pending, PaymentStatus::Failed]);
        let patch = BookingPatch {
            booking_status: Some(BookingStatus::Failed),
            payment_status: Some(PaymentStatus::Failed),
            ..Default::default()
        };

        match self.ctx.bookings.update_if(booking.id, &condition, &patch).await? {
            Some(failed) => {
                // Only the write that moved the booking out of pending releases.
                self.ctx.release_seats(&failed).await;
                self.ctx
                    .audit(
                        BookingChangeEvent::new(failed.id, "payment_failed", "webhook")
                            .transition(BookingStatus::Pending, BookingStatus::Failed)
                            .note(payment.id.clone()),
                    )
                    .await;
                info!("Booking {} failed by webhook; seats released", failed.id);
                Ok(ReconcileOutcome::Applied)
            }
            None => Ok(ReconcileOutcome::AlreadyApplied),
        }
    }

    async fn refund_update(&self, refund: &RefundEntity, target: RefundStatus) -> BookingResult<ReconcileOutcome> {
        let Some(booking) = self.ctx.bookings.find_by_payment_id(&refund.payment_id).await? else {
            warn!("Refund event {} for unknown payment {}", refund.id, refund.payment_id);
            return Ok(ReconcileOutcome::BookingNotFound);
        };

        if booking.refund_status == RefundStatus::Completed {
            return Ok(ReconcileOutcome::AlreadyApplied);
        }
        if booking.refund_status == target && booking.refund_id.as_deref() == Some(refund.id.as_str()) {
            return Ok(ReconcileOutcome::AlreadyApplied);
        }

        let condition = BookingCondition::any().refund_status(&[
            RefundStatus::None,
            RefundStatus::Requested,
            RefundStatus::Processing,
            RefundStatus::Rejected,
        ]);
        let patch = BookingPatch {
            refund_status: Some(target),
            refund_id: Some(refund.id.clone()),
            refund_amount: Some(from_minor_units(refund.amount)),
            refund_date: (target == RefundStatus::Completed).then(Utc::now),
            ..Default::default()
        };

        match self.ctx.bookings.update_if(booking.id, &condition, &patch).await? {
            Some(updated) => {
                self.ctx
                    .audit(
                        BookingChangeEvent::new(updated.id, "refund_webhook", "webhook")
                            .transition(booking.refund_status, target)
                            .note(refund.id.clone()),
                    )
                    .await;
                info!("Refund {} on booking {} is now {}", refund.id, updated.id, target);
                Ok(ReconcileOutcome::Applied)
            }
            None => Ok(ReconcileOutcome::AlreadyApplied),
        }
    }
}
