#[macro_use]
mod macros;

pub mod models;
pub mod identity;
pub mod payment;
pub mod repository;
pub mod signature;

pub use identity::{Actor, Role};
pub use models::{
    Booking, BookingCondition, BookingPatch, BookingStatus, CancelledBy, Departure,
    DepartureStatus, PaymentStatus, PayoutStatus, Plan, RefundStatus, VendorAccount,
};
pub use repository::{
    BookingRepository, DepartureRepository, PlanRepository, StoreError, StoreResult,
    VendorRepository,
};
