use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;
use wayfarer_core::payment::TransferNotes;
use wayfarer_core::{Actor, BookingCondition, BookingPatch, PaymentStatus, PayoutStatus, RefundStatus};
use wayfarer_shared::BookingChangeEvent;

use crate::context::BookingContext;
use crate::error::{BookingError, BookingResult};
use crate::pricing::percent_of;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutOutcome {
    pub booking_id: Uuid,
    pub transfer_id: String,
    pub payout_amount: i64,
    pub message: String,
}

/// Transfers the vendor's share of a paid booking to their linked account.
#[derive(Clone)]
pub struct PayoutProcessor {
    ctx: BookingContext,
}

impl PayoutProcessor {
    pub fn new(ctx: BookingContext) -> Self {
        Self { ctx }
    }

    pub async fn process_payout(&self, actor: &Actor, booking_id: Uuid) -> BookingResult<PayoutOutcome> {
        let booking = self.ctx.load_booking(booking_id).await?;
        let plan = self
            .ctx
            .plans
            .get(booking.plan_id)
            .await?
            .ok_or_else(|| BookingError::NotFound("Plan not found".to_string()))?;

        if !actor.is_admin() {
            if !(actor.is_vendor() && plan.vendor_id == actor.id) {
                return Err(BookingError::Forbidden("Only the plan's vendor or an admin can request a payout".to_string()));
            }
            if booking.trip_date > Utc::now() {
                return Err(BookingError::Forbidden("Payouts can be requested once the trip has started".to_string()));
            }
        }

        if booking.payment_status != PaymentStatus::Completed {
            return Err(BookingError::Validation("Booking has not been paid".to_string()));
        }
        match booking.vendor_payout_status {
            PayoutStatus::Completed => {
                return Err(BookingError::StateConflict("Vendor payout already completed".to_string()))
            }
            PayoutStatus::Processing => {
                return Err(BookingError::StateConflict("Vendor payout is already in progress".to_string()))
            }
            _ => {}
        }
        if booking.refund_in_flight() {
            return Err(BookingError::StateConflict(
                "Refund is in progress or completed for this booking; payout is blocked".to_string(),
            ));
        }

        let amount = booking
            .vendor_payout_amount
            .unwrap_or_else(|| percent_of(booking.total_amount, self.ctx.rules.default_vendor_cut_percent));
        if amount <= 0 {
            return Err(BookingError::Validation("Nothing is owed to the vendor for this booking".to_string()));
        }

        let account = self
            .ctx
            .vendors
            .payout_account(&plan.vendor_id)
            .await?
            .ok_or_else(|| BookingError::Validation("Vendor has no payout account configured".to_string()))?;

        let condition = BookingCondition::any()
            .payment_status(&[PaymentStatus::Completed])
            .payout_status(&[PayoutStatus::Pending, PayoutStatus::Failed])
            .refund_status(&[RefundStatus::None, RefundStatus::Rejected]);
        let claim = BookingPatch {
            vendor_payout_status: Some(PayoutStatus::Processing),
            vendor_payout_amount: Some(amount),
            ..Default::default()
        };
        if self.ctx.bookings.update_if(booking.id, &condition, &claim).await?.is_none() {
            return Err(BookingError::StateConflict(
                "A refund or vendor payout is already in progress for this booking".to_string(),
            ));
        }

        let notes = TransferNotes {
            booking_id: booking.id,
            plan_id: plan.id,
            vendor_id: plan.vendor_id.clone(),
        };
        let transfer = self
            .ctx
            .gateway
            .transfer_to_vendor(account.account_id.expose(), amount, &self.ctx.rules.currency, &notes)
            .await;

        match transfer {
            Ok(receipt) => {
                let patch = BookingPatch {
                    vendor_payout_status: Some(PayoutStatus::Completed),
                    vendor_payout_date: Some(Utc::now()),
                    transfer_id: Some(receipt.id.clone()),
                    ..Default::default()
                };
                if let Err(e) = self.ctx.bookings.update(booking.id, &patch).await {
                    error!("Transfer {} sent but not recorded on booking {}: {}", receipt.id, booking.id, e);
                }
                self.ctx
                    .audit(
                        BookingChangeEvent::new(booking.id, "vendor_payout", &actor.label())
                            .transition(booking.vendor_payout_status, PayoutStatus::Completed)
                            .note(format!("{} to {} ({})", amount, plan.vendor_id, receipt.id)),
                    )
                    .await;
                info!("Paid {} to vendor {} for booking {}", amount, plan.vendor_id, booking.id);

                Ok(PayoutOutcome {
                    booking_id: booking.id,
                    transfer_id: receipt.id,
                    payout_amount: amount,
                    message: "Vendor payout processed successfully".to_string(),
                })
            }
            Err(e) => {
                error!("Vendor payout for booking {} failed: {}", booking.id, e);
                let patch = BookingPatch {
                    vendor_payout_status: Some(PayoutStatus::Failed),
                    ..Default::default()
                };
                if let Err(store_err) = self.ctx.bookings.update(booking.id, &patch).await {
                    error!("Failed to mark payout failed on booking {}: {}", booking.id, store_err);
                }
                self.ctx
                    .audit(
                        BookingChangeEvent::new(booking.id, "vendor_payout_failed", &actor.label())
                            .transition(PayoutStatus::Processing, PayoutStatus::Failed)
                            .note(e.to_string()),
                    )
                    .await;
                Err(BookingError::Gateway(e))
            }
        }
    }
}
