pub mod booking;
pub mod departure;
pub mod plan;

pub use booking::{
    Booking, BookingCondition, BookingPatch, BookingStatus, CancelledBy, PaymentStatus,
    PayoutStatus, RefundStatus,
};
pub use departure::{Departure, DepartureStatus};
pub use plan::{Plan, VendorAccount};
