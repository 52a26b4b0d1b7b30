use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;
use wayfarer_core::payment::{from_minor_units, to_minor_units, OrderNotes};
use wayfarer_core::{
    Actor, Booking, BookingCondition, BookingPatch, BookingStatus, DepartureStatus,
    PaymentStatus, PayoutStatus, RefundStatus,
};
use wayfarer_shared::BookingChangeEvent;

use crate::context::{cancelled_by, ensure_owner_or_admin, BookingContext};
use crate::error::{BookingError, BookingResult};
use crate::pricing::FareBreakdown;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub plan_id: Uuid,
    pub departure_id: Uuid,
    pub num_people: i64,
}

/// What the checkout widget needs. `amount` is in minor units.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentOrder {
    #[serde(rename = "orderId")]
    pub order_id: String,
    pub amount: i64,
    pub currency: String,
    pub key: String,
}

/// Checkout callback fields, named the way the gateway widget posts them.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyPaymentRequest {
    #[serde(rename = "bookingId")]
    pub booking_id: Uuid,
    pub razorpay_payment_id: String,
    pub razorpay_order_id: String,
    pub razorpay_signature: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedPayment {
    pub booking_id: Uuid,
    pub already_confirmed: bool,
}

/// Drives a booking from creation through payment confirmation.
///
/// Transitions: `pending -> confirmed`, `pending -> failed`, and
/// `pending -> cancelled` when the customer walks away from checkout.
/// Cancelling a confirmed booking lives in [`crate::refund::RefundEngine`].
#[derive(Clone)]
pub struct BookingOrchestrator {
    ctx: BookingContext,
}

impl BookingOrchestrator {
    pub fn new(ctx: BookingContext) -> Self {
        Self { ctx }
    }

    /// Reserve seats and record a `pending` booking.
    pub async fn create_booking(&self, actor: &Actor, req: CreateBookingRequest) -> BookingResult<Booking> {
        let max_people = self.ctx.rules.max_people;
        if req.num_people < 1 || req.num_people > i64::from(max_people) {
            return Err(BookingError::Validation(format!(
                "Number of people must be between 1 and {}",
                max_people
            )));
        }
        let num_people = req.num_people as u32;

        let plan = self
            .ctx
            .plans
            .get(req.plan_id)
            .await?
            .ok_or_else(|| BookingError::NotFound("Plan not found".to_string()))?;
        if !plan.is_active {
            return Err(BookingError::Validation("Plan is not available for booking".to_string()));
        }

        let departure = self
            .ctx
            .departures
            .get(req.departure_id)
            .await?
            .ok_or_else(|| BookingError::NotFound("Departure not found".to_string()))?;
        if departure.plan_id != plan.id {
            return Err(BookingError::Validation("Departure does not belong to this plan".to_string()));
        }
        match departure.status {
            DepartureStatus::Cancelled => {
                return Err(BookingError::Validation("Departure has been cancelled".to_string()))
            }
            DepartureStatus::Completed => {
                return Err(BookingError::Validation("Departure has already completed".to_string()))
            }
            _ => {}
        }
        if !departure.is_active {
            return Err(BookingError::Validation("Departure is not available for booking".to_string()));
        }
        if !departure.is_bookable(Utc::now()) {
            return Err(BookingError::Validation("Departure date has already passed".to_string()));
        }

        let available = departure.available_seats();
        if available < num_people {
            return Err(BookingError::CapacityExceeded { requested: num_people, available });
        }

        // The read above is advisory; this is the write that actually guards capacity.
        self.ctx.departures.reserve(departure.id, num_people).await?;

        let fare = FareBreakdown::quote(&plan, num_people, &self.ctx.rules);
        let now = Utc::now();
        let booking = Booking {
            id: Uuid::new_v4(),
            plan_id: plan.id,
            departure_id: departure.id,
            user_id: actor.id.clone(),
            trip_date: departure.departure_date,
            num_people,
            trip_cost: fare.trip_cost,
            platform_fee: fare.platform_fee,
            platform_cut: fare.platform_cut,
            vendor_cut_percent: fare.vendor_cut_percent,
            vendor_payout_amount: Some(fare.vendor_payout_amount),
            total_amount: fare.total_amount,
            booking_status: BookingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            refund_status: RefundStatus::None,
            refund_amount: None,
            refund_percentage: None,
            refund_date: None,
            refund_id: None,
            vendor_payout_status: PayoutStatus::Pending,
            vendor_payout_date: None,
            transfer_id: None,
            gateway_order_id: None,
            gateway_payment_id: None,
            gateway_signature: None,
            cancellation_reason: None,
            cancelled_by: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.ctx.bookings.create(&booking).await {
            error!("Failed to store booking for departure {}: {}", departure.id, e);
            self.ctx.release_seats(&booking).await;
            return Err(BookingError::Persistence("Failed to create booking".to_string()));
        }

        self.ctx
            .audit(
                BookingChangeEvent::new(booking.id, "created", &actor.label())
                    .note(format!("{} seat(s) on departure {}", num_people, departure.id)),
            )
            .await;
        info!(
            "Booking {} created for {} ({} people, total {})",
            booking.id, actor.id, num_people, booking.total_amount
        );

        Ok(booking)
    }

    /// Create (or return the existing) gateway order for a pending booking.
    pub async fn create_payment_order(&self, actor: &Actor, booking_id: Uuid) -> BookingResult<PaymentOrder> {
        let booking = self.ctx.load_booking(booking_id).await?;
        if !booking.is_owned_by(&actor.id) {
            return Err(BookingError::Forbidden("You can only pay for your own bookings".to_string()));
        }
        if booking.booking_status != BookingStatus::Pending {
            return Err(BookingError::StateConflict("Booking is not awaiting payment".to_string()));
        }

        if let Some(order_id) = &booking.gateway_order_id {
            return Ok(self.payment_order(order_id.clone(), &booking));
        }

        let notes = OrderNotes {
            booking_id: booking.id,
            plan_id: booking.plan_id,
            departure_id: booking.departure_id,
            user_id: booking.user_id.clone(),
            num_people: booking.num_people,
            trip_date: booking.trip_date,
            trip_cost: booking.trip_cost,
        };
        let receipt = format!("booking_{}", booking.id);
        let order = self
            .ctx
            .gateway
            .create_order(booking.total_amount, &self.ctx.rules.currency, &receipt, &notes)
            .await
            .map_err(|e| {
                error!("Gateway order creation failed for booking {}: {}", booking.id, e);
                BookingError::Gateway(e)
            })?;

        let condition = BookingCondition::any()
            .booking_status(&[BookingStatus::Pending])
            .without_order();
        let patch = BookingPatch {
            gateway_order_id: Some(order.id.clone()),
            ..Default::default()
        };

        match self.ctx.bookings.update_if(booking.id, &condition, &patch).await? {
            Some(updated) => {
                self.ctx
                    .audit(BookingChangeEvent::new(updated.id, "payment_order_created", &actor.label()).note(order.id.clone()))
                    .await;
                info!("Order {} created for booking {}", order.id, updated.id);
                Ok(self.payment_order(order.id, &updated))
            }
            None => {
                // A concurrent request stored its order first. The gateway
                // dedupes on receipt, so hand back whatever won.
                let current = self.ctx.load_booking(booking.id).await?;
                match (&current.gateway_order_id, current.booking_status) {
                    (Some(order_id), BookingStatus::Pending) => Ok(self.payment_order(order_id.clone(), &current)),
                    _ => Err(BookingError::StateConflict("Booking is not awaiting payment".to_string())),
                }
            }
        }
    }

    fn payment_order(&self, order_id: String, booking: &Booking) -> PaymentOrder {
        PaymentOrder {
            order_id,
            amount: to_minor_units(booking.total_amount),
            currency: self.ctx.rules.currency.clone(),
            key: self.ctx.gateway.key_id().to_string(),
        }
    }

    /// Confirm a booking from the checkout callback.
    ///
    /// Every check runs before the first write, so a rejected callback leaves
    /// the booking for the webhook to settle.
    pub async fn verify_payment(&self, actor: &Actor, req: VerifyPaymentRequest) -> BookingResult<VerifiedPayment> {
        let booking = self.ctx.load_booking(req.booking_id).await?;
        if !booking.is_owned_by(&actor.id) {
            return Err(BookingError::Forbidden("You can only verify your own bookings".to_string()));
        }

        if booking.is_confirmed_and_paid() {
            return Ok(VerifiedPayment { booking_id: booking.id, already_confirmed: true });
        }

        if req.razorpay_payment_id.is_empty() || req.razorpay_order_id.is_empty() || req.razorpay_signature.is_empty() {
            return Err(BookingError::Validation("Missing payment verification fields".to_string()));
        }
        if booking.gateway_order_id.as_deref() != Some(req.razorpay_order_id.as_str()) {
            return Err(BookingError::Validation("Order does not match this booking".to_string()));
        }
        if !self
            .ctx
            .gateway
            .verify_signature(&req.razorpay_order_id, &req.razorpay_payment_id, &req.razorpay_signature)
        {
            warn!("Invalid checkout signature for booking {}", booking.id);
            return Err(BookingError::InvalidSignature);
        }

        let details = self.ctx.gateway.payment_details(&req.razorpay_payment_id).await?;
        if let Some(order_id) = &details.order_id {
            if order_id != &req.razorpay_order_id {
                return Err(BookingError::Validation("Payment belongs to a different order".to_string()));
            }
        }
        if !details.status.is_successful() {
            return Err(BookingError::Validation("Payment has not been completed".to_string()));
        }
        let paid = from_minor_units(details.amount_minor);
        if (paid - booking.total_amount).abs() > self.ctx.rules.amount_tolerance {
            warn!(
                "Amount mismatch for booking {}: paid {}, expected {}",
                booking.id, paid, booking.total_amount
            );
            return Err(BookingError::Validation("Paid amount does not match the booking total".to_string()));
        }

        // The money is real from here on. Anything that stops the booking from
        // being confirmed has to give it back.
        if booking.booking_status != BookingStatus::Pending {
            let reason = format!("booking is {}", booking.booking_status);
            return Err(self
                .ctx
                .compensate_captured_payment(&booking, &req.razorpay_payment_id, paid, &reason)
                .await);
        }

        let condition = BookingCondition::any()
            .booking_status(&[BookingStatus::Pending])
            .payment_status(&[PaymentStatus::Pending]);
        let patch = BookingPatch {
            booking_status: Some(BookingStatus::Confirmed),
            payment_status: Some(PaymentStatus::Completed),
            gateway_payment_id: Some(req.razorpay_payment_id.clone()),
            gateway_signature: Some(req.razorpay_signature.clone()),
            ..Default::default()
        };

        match self.ctx.bookings.update_if(booking.id, &condition, &patch).await {
            Ok(Some(confirmed)) => {
                self.ctx
                    .audit(
                        BookingChangeEvent::new(confirmed.id, "payment_verified", &actor.label())
                            .transition(BookingStatus::Pending, BookingStatus::Confirmed)
                            .note(req.razorpay_payment_id.clone()),
                    )
                    .await;
                info!("Booking {} confirmed by checkout callback", confirmed.id);
                Ok(VerifiedPayment { booking_id: confirmed.id, already_confirmed: false })
            }
            Ok(None) => {
                let current = self.ctx.load_booking(booking.id).await?;
                if current.is_confirmed_and_paid() {
                    // The webhook got there first.
                    return Ok(VerifiedPayment { booking_id: current.id, already_confirmed: true });
                }
                let reason = format!("booking became {} during verification", current.booking_status);
                Err(self
                    .ctx
                    .compensate_captured_payment(&current, &req.razorpay_payment_id, paid, &reason)
                    .await)
            }
            Err(e) => {
                error!("Failed to confirm booking {}: {}", booking.id, e);
                Err(self
                    .ctx
                    .compensate_captured_payment(&booking, &req.razorpay_payment_id, paid, "booking confirmation could not be saved")
                    .await)
            }
        }
    }

    /// Compensating cancel for a booking whose checkout was dismissed.
    /// Already-terminal bookings are returned as they are.
    pub async fn abandon_booking(&self, actor: &Actor, booking_id: Uuid) -> BookingResult<Booking> {
        let booking = self.ctx.load_booking(booking_id).await?;
        ensure_owner_or_admin(actor, &booking, "You can only abandon your own bookings")?;

        match booking.booking_status {
            BookingStatus::Cancelled | BookingStatus::Failed => return Ok(booking),
            BookingStatus::Confirmed => {
                return Err(BookingError::StateConflict(
                    "Booking is already paid; cancel it instead".to_string(),
                ))
            }
            BookingStatus::Pending => {}
        }

        let condition = BookingCondition::any()
            .booking_status(&[BookingStatus::Pending])
            .payment_status(&[PaymentStatus::Pending, PaymentStatus::Failed]);
        let patch = BookingPatch {
            booking_status: Some(BookingStatus::Cancelled),
            payment_status: Some(PaymentStatus::Failed),
            cancellation_reason: Some("Payment abandoned".to_string()),
            cancelled_by: Some(cancelled_by(actor)),
            cancelled_at: Some(Utc::now()),
            ..Default::default()
        };

        match self.ctx.bookings.update_if(booking.id, &condition, &patch).await? {
            Some(cancelled) => {
                self.ctx.release_seats(&cancelled).await;
                self.ctx
                    .audit(
                        BookingChangeEvent::new(cancelled.id, "abandoned", &actor.label())
                            .transition(BookingStatus::Pending, BookingStatus::Cancelled),
                    )
                    .await;
                info!("Booking {} abandoned before payment", cancelled.id);
                Ok(cancelled)
            }
            None => {
                let current = self.ctx.load_booking(booking.id).await?;
                match current.booking_status {
                    BookingStatus::Confirmed => {
                        Err(BookingError::StateConflict("Booking was confirmed while abandoning".to_string()))
                    }
                    BookingStatus::Pending => {
                        Err(BookingError::StateConflict("Booking changed while abandoning; try again".to_string()))
                    }
                    BookingStatus::Cancelled | BookingStatus::Failed => Ok(current),
                }
            }
        }
    }

    pub async fn get_booking(&self, actor: &Actor, booking_id: Uuid) -> BookingResult<Booking> {
        let booking = self.ctx.load_booking(booking_id).await?;
        ensure_owner_or_admin(actor, &booking, "You can only view your own bookings")?;
        Ok(booking)
    }

    pub async fn list_bookings(&self, actor: &Actor) -> BookingResult<Vec<Booking>> {
        Ok(self.ctx.bookings.list_by_user(&actor.id).await?)
    }
}
