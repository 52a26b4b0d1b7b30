use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;
use wayfarer_core::payment::{GatewayError, RefundNotes, RefundState};
use wayfarer_core::{
    Actor, Booking, BookingCondition, BookingPatch, BookingStatus, CancelledBy, PaymentStatus,
    PayoutStatus, RefundStatus,
};
use wayfarer_shared::BookingChangeEvent;

use crate::context::{cancelled_by, ensure_owner_or_admin, BookingContext};
use crate::error::{BookingError, BookingResult};
use crate::pricing::percent_of;

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationCause {
    Customer,
    /// The vendor called the trip off. Customer gets everything back.
    Vendor,
}

/// Tiered cancellation policy.
///
/// | days until trip | refund |
/// |---|---|
/// | 15 or more | 100% |
/// | 8 to 14 | 50% |
/// | 7 or fewer | 0% |
pub struct RefundPolicy;

impl RefundPolicy {
    /// Whole days until the trip, rounded up. Negative once the trip is past.
    pub fn days_until(trip_date: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
        let millis = (trip_date - now).num_milliseconds();
        let days = millis.div_euclid(MILLIS_PER_DAY);
        if millis.rem_euclid(MILLIS_PER_DAY) > 0 {
            days + 1
        } else {
            days
        }
    }

    pub fn percentage(days_until_trip: i64, cause: CancellationCause) -> u8 {
        if cause == CancellationCause::Vendor {
            return 100;
        }
        match days_until_trip {
            d if d >= 15 => 100,
            8..=14 => 50,
            _ => 0,
        }
    }
}

/// Amounts a refund would move. The platform fee is never refunded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundQuote {
    pub days_until_trip: i64,
    pub percentage: u8,
    pub refund_amount: i64,
    /// What the vendor is still owed afterwards.
    pub vendor_payout_amount: i64,
}

impl RefundQuote {
    pub fn for_booking(booking: &Booking, cause: CancellationCause, now: DateTime<Utc>) -> Self {
        let days_until_trip = RefundPolicy::days_until(booking.trip_date, now);
        let percentage = RefundPolicy::percentage(days_until_trip, cause);
        let refund_amount = percent_of(booking.trip_cost, percentage);
        let vendor_payout_amount = match cause {
            CancellationCause::Vendor => 0,
            CancellationCause::Customer => {
                percent_of(booking.trip_cost - refund_amount, booking.vendor_cut_percent)
            }
        };
        Self { days_until_trip, percentage, refund_amount, vendor_payout_amount }
    }

    /// Reuses what cancellation already settled, so a retried refund is not
    /// repriced against a closer trip date.
    fn settled(booking: &Booking, cause: CancellationCause, now: DateTime<Utc>) -> Self {
        match (booking.refund_percentage, booking.refund_amount) {
            (Some(percentage), Some(refund_amount)) if booking.booking_status == BookingStatus::Cancelled => Self {
                days_until_trip: RefundPolicy::days_until(booking.trip_date, now),
                percentage,
                refund_amount,
                vendor_payout_amount: booking
                    .vendor_payout_amount
                    .unwrap_or_else(|| percent_of(booking.trip_cost - refund_amount, booking.vendor_cut_percent)),
            },
            _ => Self::for_booking(booking, cause, now),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    #[serde(default)]
    pub vendor_cancellation: bool,
    pub vendor_id: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundOutcome {
    pub booking_id: Uuid,
    pub refund_id: Option<String>,
    pub refund_amount: i64,
    pub refund_percentage: u8,
    pub refund_status: RefundStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationOutcome {
    pub booking_id: Uuid,
    pub cancelled_by: CancelledBy,
    pub refund_amount: i64,
    pub refund_percentage: u8,
    pub refund_status: RefundStatus,
    pub refund_id: Option<String>,
    pub vendor_payout_amount: i64,
    pub message: String,
}

#[derive(Clone)]
pub struct RefundEngine {
    ctx: BookingContext,
}

impl RefundEngine {
    pub fn new(ctx: BookingContext) -> Self {
        Self { ctx }
    }

    /// Cancel a booking and refund what the policy allows.
    ///
    /// Unpaid bookings are simply closed. Paid ones are cancelled first, then
    /// their seats go back, then the refund runs; a failed refund leaves the
    /// cancellation in place with refund status `rejected`.
    pub async fn cancel(&self, actor: &Actor, booking_id: Uuid, req: CancelRequest) -> BookingResult<CancellationOutcome> {
        let booking = self.ctx.load_booking(booking_id).await?;
        let plan = self
            .ctx
            .plans
            .get(booking.plan_id)
            .await?
            .ok_or_else(|| BookingError::NotFound("Plan not found".to_string()))?;

        let plan_vendor = actor.is_vendor() && plan.vendor_id == actor.id;
        if !(actor.is_admin() || plan_vendor || booking.is_owned_by(&actor.id)) {
            return Err(BookingError::Forbidden("You are not allowed to cancel this booking".to_string()));
        }
        if req.vendor_cancellation && !(actor.is_admin() || plan_vendor) {
            return Err(BookingError::Forbidden("Only the vendor or an admin can cancel on the vendor's behalf".to_string()));
        }
        if let Some(vendor_id) = &req.vendor_id {
            if vendor_id != &plan.vendor_id {
                return Err(BookingError::Validation("Vendor does not operate this plan".to_string()));
            }
        }
        let cause = if plan_vendor || req.vendor_cancellation {
            CancellationCause::Vendor
        } else {
            CancellationCause::Customer
        };

        if matches!(booking.booking_status, BookingStatus::Cancelled | BookingStatus::Failed) {
            return Err(BookingError::StateConflict("Booking is already cancelled".to_string()));
        }
        if booking.vendor_payout_status == PayoutStatus::Completed {
            return Err(BookingError::StateConflict("Vendor has already been paid for this booking".to_string()));
        }
        let now = Utc::now();
        if booking.trip_date <= now {
            return Err(BookingError::StateConflict("Trip has already started".to_string()));
        }

        let reason = req
            .reason
            .clone()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| match cause {
                CancellationCause::Vendor => "Cancelled by vendor".to_string(),
                CancellationCause::Customer => "Cancelled by customer".to_string(),
            });
        let by = match cause {
            CancellationCause::Vendor if !actor.is_admin() => CancelledBy::Vendor,
            _ => cancelled_by(actor),
        };

        if booking.payment_status != PaymentStatus::Completed {
            return self.close_unpaid(actor, &booking, by, reason).await;
        }

        let quote = RefundQuote::for_booking(&booking, cause, now);
        let condition = BookingCondition::any()
            .booking_status(&[BookingStatus::Confirmed])
            .payment_status(&[PaymentStatus::Completed])
            .refund_status(&[RefundStatus::None, RefundStatus::Rejected])
            .payout_status(&[PayoutStatus::Pending, PayoutStatus::Failed]);
        let patch = BookingPatch {
            booking_status: Some(BookingStatus::Cancelled),
            cancellation_reason: Some(reason.clone()),
            cancelled_by: Some(by),
            cancelled_at: Some(now),
            refund_percentage: Some(quote.percentage),
            refund_amount: Some(quote.refund_amount),
            vendor_payout_amount: Some(quote.vendor_payout_amount),
            refund_status: (quote.refund_amount > 0).then_some(RefundStatus::Requested),
            ..Default::default()
        };

        let cancelled = match self.ctx.bookings.update_if(booking.id, &condition, &patch).await? {
            Some(cancelled) => cancelled,
            None => {
                let current = self.ctx.load_booking(booking.id).await?;
                return Err(if current.holds_seats() {
                    BookingError::StateConflict("Booking is being refunded or paid out; try again later".to_string())
                } else {
                    BookingError::StateConflict("Booking is already cancelled".to_string())
                });
            }
        };

        self.ctx.release_seats(&cancelled).await;
        self.ctx
            .audit(
                BookingChangeEvent::new(cancelled.id, "cancelled", &actor.label())
                    .transition(booking.booking_status, BookingStatus::Cancelled)
                    .note(format!("{} ({}% refund, {} days out)", reason, quote.percentage, quote.days_until_trip)),
            )
            .await;
        info!(
            "Booking {} cancelled by {} with {}% refund",
            cancelled.id, by, quote.percentage
        );

        let mut outcome = CancellationOutcome {
            booking_id: cancelled.id,
            cancelled_by: by,
            refund_amount: quote.refund_amount,
            refund_percentage: quote.percentage,
            refund_status: cancelled.refund_status,
            refund_id: None,
            vendor_payout_amount: quote.vendor_payout_amount,
            message: match cause {
                CancellationCause::Vendor => "Booking cancelled by vendor. Full refund initiated.".to_string(),
                CancellationCause::Customer if quote.percentage == 0 => {
                    "Booking cancelled. No refund is due for cancellations within 7 days of the trip.".to_string()
                }
                CancellationCause::Customer => {
                    format!("Booking cancelled. {}% of the trip cost will be refunded.", quote.percentage)
                }
            },
        };

        if quote.refund_amount == 0 {
            return Ok(outcome);
        }

        match self.execute_refund(actor, &cancelled, quote, &reason).await {
            Ok(refund) => {
                outcome.refund_status = refund.refund_status;
                outcome.refund_id = refund.refund_id;
            }
            Err(BookingError::Gateway(e)) => {
                // The cancellation stands; the rejected refund can be retried.
                warn!("Booking {} cancelled but refund failed: {}", cancelled.id, e);
                outcome.refund_status = RefundStatus::Rejected;
                outcome.message = "Booking cancelled. The refund could not be processed and will be retried by support.".to_string();
            }
            Err(e) => return Err(e),
        }

        Ok(outcome)
    }

    async fn close_unpaid(
        &self,
        actor: &Actor,
        booking: &Booking,
        by: CancelledBy,
        reason: String,
    ) -> BookingResult<CancellationOutcome> {
        let condition = BookingCondition::any()
            .booking_status(&[BookingStatus::Pending])
            .payment_status(&[PaymentStatus::Pending, PaymentStatus::Failed]);
        let patch = BookingPatch {
            booking_status: Some(BookingStatus::Cancelled),
            payment_status: Some(PaymentStatus::Failed),
            cancellation_reason: Some(reason),
            cancelled_by: Some(by),
            cancelled_at: Some(Utc::now()),
            ..Default::default()
        };

        let cancelled = self
            .ctx
            .bookings
            .update_if(booking.id, &condition, &patch)
            .await?
            .ok_or_else(|| BookingError::StateConflict("Booking changed while cancelling; try again".to_string()))?;

        self.ctx.release_seats(&cancelled).await;
        self.ctx
            .audit(
                BookingChangeEvent::new(cancelled.id, "cancelled", &actor.label())
                    .transition(BookingStatus::Pending, BookingStatus::Cancelled)
                    .note("unpaid"),
            )
            .await;

        Ok(CancellationOutcome {
            booking_id: cancelled.id,
            cancelled_by: by,
            refund_amount: 0,
            refund_percentage: 0,
            refund_status: RefundStatus::None,
            refund_id: None,
            vendor_payout_amount: 0,
            message: "Booking cancelled. No payment had been taken.".to_string(),
        })
    }

    /// Refund a paid booking according to policy.
    pub async fn refund(&self, actor: &Actor, booking_id: Uuid) -> BookingResult<RefundOutcome> {
        let booking = self.ctx.load_booking(booking_id).await?;
        ensure_owner_or_admin(actor, &booking, "You can only refund your own bookings")?;

        if booking.payment_status != PaymentStatus::Completed {
            return Err(BookingError::Validation("Only completed payments can be refunded".to_string()));
        }
        match booking.refund_status {
            RefundStatus::Completed => {
                return Err(BookingError::StateConflict("Booking already refunded".to_string()))
            }
            RefundStatus::Processing => {
                return Err(BookingError::StateConflict("Refund is already being processed".to_string()))
            }
            _ => {}
        }
        match booking.vendor_payout_status {
            PayoutStatus::Completed => {
                return Err(BookingError::StateConflict("Cannot refund after vendor payout is completed".to_string()))
            }
            PayoutStatus::Processing => {
                return Err(BookingError::StateConflict("Vendor payout is in progress".to_string()))
            }
            _ => {}
        }

        let now = Utc::now();
        let cause = match booking.cancelled_by {
            Some(CancelledBy::Vendor) => CancellationCause::Vendor,
            _ => CancellationCause::Customer,
        };
        let vendor_cancelled = booking.booking_status == BookingStatus::Cancelled && cause == CancellationCause::Vendor;
        if booking.trip_date <= now && !vendor_cancelled {
            return Err(BookingError::Validation("Trip has already started. Refund not available.".to_string()));
        }

        let quote = RefundQuote::settled(&booking, cause, now);

        if quote.percentage == 0 {
            if booking.booking_status != BookingStatus::Cancelled {
                return Err(BookingError::Validation(
                    "Refund not available. Cancellations must be made at least 8 days before the trip for a 50% refund, or 15+ days for a full refund.".to_string(),
                ));
            }
            return self.finalize_without_refund(actor, &booking, quote).await;
        }

        let reason = format!("{}% refund - Cancellation policy", quote.percentage);
        self.execute_refund(actor, &booking, quote, &reason).await
    }

    /// 0% on a cancelled booking: record the zero refund, no gateway call.
    /// Refund status stays `none` so the vendor can still be paid.
    async fn finalize_without_refund(&self, actor: &Actor, booking: &Booking, quote: RefundQuote) -> BookingResult<RefundOutcome> {
        let condition = BookingCondition::any()
            .refund_status(&[RefundStatus::None, RefundStatus::Requested, RefundStatus::Rejected])
            .payout_status(&[PayoutStatus::Pending, PayoutStatus::Failed]);
        let patch = BookingPatch {
            refund_status: Some(RefundStatus::None),
            refund_amount: Some(0),
            refund_percentage: Some(0),
            vendor_payout_amount: Some(quote.vendor_payout_amount),
            ..Default::default()
        };
        self.ctx
            .bookings
            .update_if(booking.id, &condition, &patch)
            .await?
            .ok_or_else(|| BookingError::StateConflict("Booking changed while refunding; try again".to_string()))?;

        self.ctx
            .audit(BookingChangeEvent::new(booking.id, "refund_waived", &actor.label()).note("0% under cancellation policy"))
            .await;

        Ok(RefundOutcome {
            booking_id: booking.id,
            refund_id: None,
            refund_amount: 0,
            refund_percentage: 0,
            refund_status: RefundStatus::None,
            message: "No refund is due under the cancellation policy.".to_string(),
        })
    }

    /// Claim, call the gateway, record the result. The claim is what keeps a
    /// refund and a vendor payout from both going out.
    async fn execute_refund(
        &self,
        actor: &Actor,
        booking: &Booking,
        quote: RefundQuote,
        reason: &str,
    ) -> BookingResult<RefundOutcome> {
        let payment_id = booking
            .gateway_payment_id
            .clone()
            .ok_or_else(|| BookingError::Validation("Payment ID not found for refund".to_string()))?;

        let condition = BookingCondition::any()
            .payment_status(&[PaymentStatus::Completed])
            .refund_status(&[RefundStatus::None, RefundStatus::Requested, RefundStatus::Rejected])
            .payout_status(&[PayoutStatus::Pending, PayoutStatus::Failed]);
        let claim = BookingPatch {
            refund_status: Some(RefundStatus::Processing),
            refund_amount: Some(quote.refund_amount),
            refund_percentage: Some(quote.percentage),
            vendor_payout_amount: Some(quote.vendor_payout_amount),
            ..Default::default()
        };
        if self.ctx.bookings.update_if(booking.id, &condition, &claim).await?.is_none() {
            return Err(BookingError::StateConflict(
                "A refund or vendor payout is already in progress for this booking".to_string(),
            ));
        }

        let notes = RefundNotes {
            booking_id: booking.id,
            reason: reason.to_string(),
            booking_failure: false,
        };

        let receipt = match self.ctx.gateway.refund(&payment_id, quote.refund_amount, &notes).await {
            Ok(receipt) => receipt,
            Err(e) => {
                error!("Refund for booking {} failed: {}", booking.id, e);
                self.mark_rejected(actor, booking.id, None, &e.to_string()).await;
                return Err(BookingError::Gateway(e));
            }
        };

        if receipt.status == RefundState::Failed {
            error!("Gateway reported refund {} for booking {} as failed", receipt.id, booking.id);
            self.mark_rejected(actor, booking.id, Some(receipt.id.clone()), "gateway reported failure").await;
            return Err(BookingError::Gateway(GatewayError::Declined(format!("refund {} failed", receipt.id))));
        }

        let completed = receipt.status == RefundState::Processed;
        let patch = BookingPatch {
            refund_status: Some(if completed { RefundStatus::Completed } else { RefundStatus::Processing }),
            refund_id: Some(receipt.id.clone()),
            refund_date: completed.then(Utc::now),
            ..Default::default()
        };
        // A refund webhook may have settled the booking while the call was out.
        let refund_status = self
            .ctx
            .settle_refund(booking.id, &patch, &receipt.id)
            .await
            .map(|current| current.refund_status)
            .unwrap_or(RefundStatus::Processing);

        self.ctx
            .audit(
                BookingChangeEvent::new(booking.id, "refund", &actor.label())
                    .transition(booking.refund_status, refund_status)
                    .note(format!("{} refunded ({})", quote.refund_amount, receipt.id)),
            )
            .await;
        info!(
            "Refund {} of {} ({}%) for booking {} is {}",
            receipt.id, quote.refund_amount, quote.percentage, booking.id, refund_status
        );

        Ok(RefundOutcome {
            booking_id: booking.id,
            refund_id: Some(receipt.id),
            refund_amount: quote.refund_amount,
            refund_percentage: quote.percentage,
            refund_status,
            message: format!(
                "Refund processed successfully. {}% of trip cost refunded.",
                quote.percentage
            ),
        })
    }

    async fn mark_rejected(&self, actor: &Actor, booking_id: Uuid, refund_id: Option<String>, cause: &str) {
        let patch = BookingPatch {
            refund_status: Some(RefundStatus::Rejected),
            refund_id,
            ..Default::default()
        };
        self.ctx.settle_refund(booking_id, &patch, "rejected").await;
        self.ctx
            .audit(
                BookingChangeEvent::new(booking_id, "refund_rejected", &actor.label())
                    .transition(RefundStatus::Processing, RefundStatus::Rejected)
                    .note(cause.to_string()),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_tier_table() {
        let tiers = [(15, 100), (14, 50), (8, 50), (7, 0), (1, 0), (0, 0)];
        for (days, expected) in tiers {
            assert_eq!(
                RefundPolicy::percentage(days, CancellationCause::Customer),
                expected,
                "{} days",
                days
            );
        }
        assert_eq!(RefundPolicy::percentage(60, CancellationCause::Customer), 100);
    }

    #[test]
    fn test_vendor_cancellation_always_refunds_in_full() {
        for days in [30, 10, 3, 0] {
            assert_eq!(RefundPolicy::percentage(days, CancellationCause::Vendor), 100);
        }
    }

    #[test]
    fn test_days_until_rounds_up() {
        let now = Utc::now();
        assert_eq!(RefundPolicy::days_until(now + Duration::days(10), now), 10);
        assert_eq!(RefundPolicy::days_until(now + Duration::days(7) + Duration::hours(1), now), 8);
        assert_eq!(RefundPolicy::days_until(now + Duration::hours(2), now), 1);
        assert_eq!(RefundPolicy::days_until(now - Duration::hours(36), now), -1);
    }
}
