use async_trait::async_trait;
use uuid::Uuid;
use wayfarer_shared::BookingChangeEvent;

use crate::models::{Booking, BookingCondition, BookingPatch, Departure, Plan, VendorAccount};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record already exists: {0}")]
    DuplicateId(String),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Capacity exceeded for departure {departure_id}: requested {requested}, available {available}")]
    CapacityExceeded {
        departure_id: Uuid,
        requested: u32,
        available: u32,
    },
    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Seat inventory per departure. `reserve` and `release` are the only mutators
/// of `booked_seats`, and each is a single conditional write.
#[async_trait]
pub trait DepartureRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> StoreResult<Option<Departure>>;

    async fn list_by_plan(&self, plan_id: Uuid) -> StoreResult<Vec<Departure>>;

    async fn insert(&self, departure: &Departure) -> StoreResult<()>;

    /// Adds `count` booked seats if `booked + count <= capacity`, otherwise
    /// fails with [`StoreError::CapacityExceeded`].
    async fn reserve(&self, id: Uuid, count: u32) -> StoreResult<Departure>;

    /// Removes `count` booked seats, clamped at zero.
    async fn release(&self, id: Uuid, count: u32) -> StoreResult<Departure>;
}

/// Booking records. The store does not enforce business rules; callers make
/// transitions idempotent through [`BookingRepository::update_if`].
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn create(&self, booking: &Booking) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<Booking>>;

    /// Newest first.
    async fn list_by_user(&self, user_id: &str) -> StoreResult<Vec<Booking>>;

    async fn find_by_payment_id(&self, payment_id: &str) -> StoreResult<Option<Booking>>;

    async fn find_by_order_id(&self, order_id: &str) -> StoreResult<Option<Booking>>;

    /// Unconditional partial update.
    async fn update(&self, id: Uuid, patch: &BookingPatch) -> StoreResult<Booking>;

    /// Applies `patch` only if `condition` holds, as one atomic write.
    /// Returns `None` when the booking exists but the condition failed.
    async fn update_if(
        &self,
        id: Uuid,
        condition: &BookingCondition,
        patch: &BookingPatch,
    ) -> StoreResult<Option<Booking>>;

    async fn record_change(&self, change: &BookingChangeEvent) -> StoreResult<()>;

    async fn list_changes(&self, booking_id: Uuid) -> StoreResult<Vec<BookingChangeEvent>>;
}

#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> StoreResult<Option<Plan>>;

    async fn insert(&self, plan: &Plan) -> StoreResult<()>;
}

#[async_trait]
pub trait VendorRepository: Send + Sync {
    async fn payout_account(&self, vendor_id: &str) -> StoreResult<Option<VendorAccount>>;

    async fn upsert_account(&self, account: &VendorAccount) -> StoreResult<()>;
}
