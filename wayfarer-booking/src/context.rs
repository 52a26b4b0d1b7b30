use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;
use wayfarer_core::payment::{PaymentGateway, RefundNotes, RefundState};
use wayfarer_core::{
    Actor, Booking, BookingCondition, BookingPatch, BookingRepository, BookingStatus,
    CancelledBy, DepartureRepository, PaymentStatus, PlanRepository, RefundStatus, Role,
    VendorRepository,
};
use wayfarer_shared::BookingChangeEvent;

use crate::error::{BookingError, BookingResult};

/// Business knobs loaded from configuration.
#[derive(Debug, Clone)]
pub struct BookingRules {
    /// Vendor share when a plan does not set its own.
    pub default_vendor_cut_percent: u8,
    /// Surcharge on top of the trip cost. Never refunded.
    pub platform_fee_percent: u8,
    pub currency: String,
    /// Accepted difference between paid and expected amount, in whole units.
    pub amount_tolerance: i64,
    pub max_people: u32,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            default_vendor_cut_percent: 85,
            platform_fee_percent: 0,
            currency: "INR".to_string(),
            amount_tolerance: 1,
            max_people: 10,
        }
    }
}

/// Collaborators shared by every booking service.
#[derive(Clone)]
pub struct BookingContext {
    pub plans: Arc<dyn PlanRepository>,
    pub departures: Arc<dyn DepartureRepository>,
    pub bookings: Arc<dyn BookingRepository>,
    pub vendors: Arc<dyn VendorRepository>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub rules: BookingRules,
}

impl BookingContext {
    pub async fn load_booking(&self, id: Uuid) -> BookingResult<Booking> {
        self.bookings
            .get(id)
            .await?
            .ok_or_else(|| BookingError::NotFound("Booking not found".to_string()))
    }

    /// Appends to the audit trail. A failed append never fails the operation.
    pub async fn audit(&self, change: BookingChangeEvent) {
        if let Err(e) = self.bookings.record_change(&change).await {
            warn!("Failed to record {} for booking {}: {}", change.action, change.booking_id, e);
        }
    }

    /// Gives a booking's seats back to its departure. Best effort: a failure
    /// leaves seats over-reserved, which is logged for an operator.
    pub async fn release_seats(&self, booking: &Booking) {
        match self.departures.release(booking.departure_id, booking.num_people).await {
            Ok(departure) => info!(
                "Released {} seat(s) on departure {} ({} booked)",
                booking.num_people, departure.id, departure.booked_seats
            ),
            Err(e) => error!(
                "Failed to release {} seat(s) on departure {} for booking {}: {}",
                booking.num_people, booking.departure_id, booking.id, e
            ),
        }
    }

    /// Returns a genuine payment for a booking that could not be honoured.
    ///
    /// The claim moves refund status to `processing` in one conditional write,
    /// so verify and the webhook cannot both refund the same payment. A booking
    /// still `pending` is failed by the same write and its seats released.
    /// Always yields an error for the caller to surface.
    pub async fn compensate_captured_payment(
        &self,
        booking: &Booking,
        payment_id: &str,
        amount: i64,
        reason: &str,
    ) -> BookingError {
        let was_pending = booking.booking_status == BookingStatus::Pending;
        let status_guard: &[BookingStatus] = if was_pending {
            &[BookingStatus::Pending]
        } else {
            &[BookingStatus::Failed, BookingStatus::Cancelled]
        };
        let condition = BookingCondition::any()
            .booking_status(status_guard)
            .payment_status(&[PaymentStatus::Pending, PaymentStatus::Failed])
            .refund_status(&[RefundStatus::None]);
        let claim = BookingPatch {
            booking_status: was_pending.then_some(BookingStatus::Failed),
            payment_status: Some(PaymentStatus::Completed),
            gateway_payment_id: Some(payment_id.to_string()),
            refund_status: Some(RefundStatus::Processing),
            refund_amount: Some(amount),
            refund_percentage: Some(100),
            ..Default::default()
        };

        match self.bookings.update_if(booking.id, &condition, &claim).await {
            Ok(Some(claimed)) => {
                if was_pending {
                    self.release_seats(&claimed).await;
                    self.audit(
                        BookingChangeEvent::new(claimed.id, "failed_after_capture", "system")
                            .transition(BookingStatus::Pending, BookingStatus::Failed)
                            .note(reason.to_string()),
                    )
                    .await;
                }
            }
            Ok(None) => {
                // Someone else already claimed it.
                return match self.bookings.get(booking.id).await {
                    Ok(Some(current)) if current.refund_in_flight() => BookingError::PaymentRefunded {
                        payment_id: payment_id.to_string(),
                        reason: reason.to_string(),
                    },
                    _ => BookingError::CompensationFailed {
                        payment_id: payment_id.to_string(),
                        reason: format!("{}; booking changed before the refund could be claimed", reason),
                    },
                };
            }
            // The store being down is the very failure we are compensating for;
            // the money still has to go back.
            Err(e) => error!("Could not claim compensating refund for booking {}: {}", booking.id, e),
        }

        let notes = RefundNotes {
            booking_id: booking.id,
            reason: format!("Automatic refund: {}", reason),
            booking_failure: true,
        };

        match self.gateway.refund(payment_id, amount, &notes).await {
            Ok(receipt) if receipt.status != RefundState::Failed => {
                let completed = receipt.status == RefundState::Processed;
                let patch = BookingPatch {
                    refund_status: Some(if completed { RefundStatus::Completed } else { RefundStatus::Processing }),
                    refund_id: Some(receipt.id.clone()),
                    refund_date: completed.then(Utc::now),
                    ..Default::default()
                };
                self.settle_refund(booking.id, &patch, &receipt.id).await;
                warn!("Refunded payment {} for booking {}: {}", payment_id, booking.id, reason);
                self.audit(
                    BookingChangeEvent::new(booking.id, "compensating_refund", "system")
                        .transition(booking.refund_status, RefundStatus::Processing)
                        .note(format!("{} ({})", reason, receipt.id)),
                )
                .await;
                BookingError::PaymentRefunded {
                    payment_id: payment_id.to_string(),
                    reason: reason.to_string(),
                }
            }
            outcome => {
                let (refund_id, cause) = match outcome {
                    Ok(receipt) => (Some(receipt.id.clone()), format!("refund {} failed at the gateway", receipt.id)),
                    Err(e) => (None, e.to_string()),
                };
                let patch = BookingPatch {
                    refund_status: Some(RefundStatus::Rejected),
                    refund_id,
                    ..Default::default()
                };
                self.settle_refund(booking.id, &patch, "rejected").await;
                error!(
                    "MANUAL ACTION REQUIRED: payment {} for booking {} could not be refunded: {}",
                    payment_id, booking.id, cause
                );
                self.audit(
                    BookingChangeEvent::new(booking.id, "compensating_refund_failed", "system")
                        .note(format!("{}: {}", reason, cause)),
                )
                .await;
                BookingError::CompensationFailed {
                    payment_id: payment_id.to_string(),
                    reason: reason.to_string(),
                }
            }
        }
    }

    /// Records what the gateway said about a claimed refund. Applies only while
    /// the refund is still `processing`; a refund webhook that landed first
    /// has already settled it. Returns the booking as it stands afterwards.
    pub async fn settle_refund(&self, booking_id: Uuid, patch: &BookingPatch, label: &str) -> Option<Booking> {
        let condition = BookingCondition::any().refund_status(&[RefundStatus::Processing]);
        match self.bookings.update_if(booking_id, &condition, patch).await {
            Ok(Some(updated)) => Some(updated),
            Ok(None) => {
                info!("Refund on booking {} already settled; keeping it over {}", booking_id, label);
                self.bookings.get(booking_id).await.ok().flatten()
            }
            Err(e) => {
                // Money has moved; the refund webhook will settle the record.
                error!("Refund {} not recorded on booking {}: {}", label, booking_id, e);
                None
            }
        }
    }
}

/// Maps the acting role onto the cancellation record.
pub fn cancelled_by(actor: &Actor) -> CancelledBy {
    match actor.role {
        Role::User => CancelledBy::User,
        Role::Vendor => CancelledBy::Vendor,
        Role::Admin => CancelledBy::Admin,
    }
}

/// Owner or admin; anybody else gets `Forbidden` with `message`.
pub fn ensure_owner_or_admin(actor: &Actor, booking: &Booking, message: &str) -> BookingResult<()> {
    if actor.is_admin() || booking.is_owned_by(&actor.id) {
        Ok(())
    } else {
        Err(BookingError::Forbidden(message.to_string()))
    }
}
