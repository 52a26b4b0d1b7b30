use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wayfarer_shared::Masked;

status_enum! {
    BookingStatus {
        Pending => "pending",
        Confirmed => "confirmed",
        Cancelled => "cancelled",
        Failed => "failed",
    }
}

status_enum! {
    PaymentStatus {
        Pending => "pending",
        Completed => "completed",
        Failed => "failed",
    }
}

status_enum! {
    RefundStatus {
        None => "none",
        Requested => "requested",
        Processing => "processing",
        Completed => "completed",
        Rejected => "rejected",
    }
}

status_enum! {
    PayoutStatus {
        Pending => "pending",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
    }
}

status_enum! {
    /// Who cancelled a booking. Vendor cancellations bypass the refund tiers.
    CancelledBy {
        User => "user",
        Vendor => "vendor",
        Admin => "admin",
    }
}

/// The booking record. Rows are never deleted; terminal states are
/// `cancelled` and `failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub departure_id: Uuid,
    pub user_id: String,
    pub trip_date: DateTime<Utc>,
    pub num_people: u32,
    pub trip_cost: i64,
    pub platform_fee: i64,
    pub platform_cut: i64,
    pub vendor_cut_percent: u8,
    pub vendor_payout_amount: Option<i64>,
    pub total_amount: i64,
    pub booking_status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub refund_status: RefundStatus,
    pub refund_amount: Option<i64>,
    pub refund_percentage: Option<u8>,
    pub refund_date: Option<DateTime<Utc>>,
    pub refund_id: Option<String>,
    pub vendor_payout_status: PayoutStatus,
    pub vendor_payout_date: Option<DateTime<Utc>>,
    pub transfer_id: Option<String>,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    #[serde(skip_serializing)]
    pub gateway_signature: Option<Masked<String>>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<CancelledBy>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Confirmation already happened, by either the client or the webhook.
    pub fn is_confirmed_and_paid(&self) -> bool {
        self.booking_status == BookingStatus::Confirmed
            && self.payment_status == PaymentStatus::Completed
    }

    /// Seats stay reserved on the departure only while this holds.
    pub fn holds_seats(&self) -> bool {
        matches!(self.booking_status, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    /// Refund or payout is moving money, so the other flow must stay out.
    pub fn refund_in_flight(&self) -> bool {
        matches!(
            self.refund_status,
            RefundStatus::Requested | RefundStatus::Processing | RefundStatus::Completed
        )
    }

    pub fn apply(&mut self, patch: &BookingPatch) {
        if let Some(v) = patch.booking_status {
            self.booking_status = v;
        }
        if let Some(v) = patch.payment_status {
            self.payment_status = v;
        }
        if let Some(v) = patch.refund_status {
            self.refund_status = v;
        }
        if let Some(v) = patch.refund_amount {
            self.refund_amount = Some(v);
        }
        if let Some(v) = patch.refund_percentage {
            self.refund_percentage = Some(v);
        }
        if let Some(v) = patch.refund_date {
            self.refund_date = Some(v);
        }
        if let Some(v) = &patch.refund_id {
            self.refund_id = Some(v.clone());
        }
        if let Some(v) = patch.vendor_payout_status {
            self.vendor_payout_status = v;
        }
        if let Some(v) = patch.vendor_payout_amount {
            self.vendor_payout_amount = Some(v);
        }
        if let Some(v) = patch.vendor_payout_date {
            self.vendor_payout_date = Some(v);
        }
        if let Some(v) = &patch.transfer_id {
            self.transfer_id = Some(v.clone());
        }
        if let Some(v) = &patch.gateway_order_id {
            self.gateway_order_id = Some(v.clone());
        }
        if let Some(v) = &patch.gateway_payment_id {
            self.gateway_payment_id = Some(v.clone());
        }
        if let Some(v) = &patch.gateway_signature {
            self.gateway_signature = Some(Masked::new(v.clone()));
        }
        if let Some(v) = &patch.cancellation_reason {
            self.cancellation_reason = Some(v.clone());
        }
        if let Some(v) = patch.cancelled_by {
            self.cancelled_by = Some(v);
        }
        if let Some(v) = patch.cancelled_at {
            self.cancelled_at = Some(v);
        }
        self.updated_at = Utc::now();
    }
}

/// Field-level partial update. `None` leaves the stored value untouched; a patch
/// never clears a field.
#[derive(Debug, Clone, Default)]
pub struct BookingPatch {
    pub booking_status: Option<BookingStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub refund_status: Option<RefundStatus>,
    pub refund_amount: Option<i64>,
    pub refund_percentage: Option<u8>,
    pub refund_date: Option<DateTime<Utc>>,
    pub refund_id: Option<String>,
    pub vendor_payout_status: Option<PayoutStatus>,
    pub vendor_payout_amount: Option<i64>,
    pub vendor_payout_date: Option<DateTime<Utc>>,
    pub transfer_id: Option<String>,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub gateway_signature: Option<String>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<CancelledBy>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Precondition for a conditional write. Empty lists match any value.
///
/// The store evaluates the condition and applies the patch as one atomic step,
/// which is what makes the client and webhook paths converge.
#[derive(Debug, Clone, Default)]
pub struct BookingCondition {
    pub booking_status_in: Vec<BookingStatus>,
    pub payment_status_in: Vec<PaymentStatus>,
    pub refund_status_in: Vec<RefundStatus>,
    pub payout_status_in: Vec<PayoutStatus>,
    pub order_id_absent: bool,
}

impl BookingCondition {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn booking_status(mut self, statuses: &[BookingStatus]) -> Self {
        self.booking_status_in = statuses.to_vec();
        self
    }

    pub fn payment_status(mut self, statuses: &[PaymentStatus]) -> Self {
        self.payment_status_in = statuses.to_vec();
        self
    }

    pub fn refund_status(mut self, statuses: &[RefundStatus]) -> Self {
        self.refund_status_in = statuses.to_vec();
        self
    }

    pub fn payout_status(mut self, statuses: &[PayoutStatus]) -> Self {
        self.payout_status_in = statuses.to_vec();
        self
    }

    pub fn without_order(mut self) -> Self {
        self.order_id_absent = true;
        self
    }

    pub fn matches(&self, booking: &Booking) -> bool {
        fn allowed<T: PartialEq>(set: &[T], value: &T) -> bool {
            set.is_empty() || set.contains(value)
        }

        allowed(&self.booking_status_in, &booking.booking_status)
            && allowed(&self.payment_status_in, &booking.payment_status)
            && allowed(&self.refund_status_in, &booking.refund_status)
            && allowed(&self.payout_status_in, &booking.vendor_payout_status)
            && (!self.order_id_absent || booking.gateway_order_id.is_none())
    }
}
