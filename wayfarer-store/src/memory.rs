use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;
use wayfarer_core::{
    Booking, BookingCondition, BookingPatch, BookingRepository, Departure, DepartureRepository,
    Plan, PlanRepository, StoreError, StoreResult, VendorAccount, VendorRepository,
};
use wayfarer_shared::BookingChangeEvent;

#[derive(Default)]
struct Tables {
    plans: HashMap<Uuid, Plan>,
    departures: HashMap<Uuid, Departure>,
    bookings: HashMap<Uuid, Booking>,
    changes: Vec<BookingChangeEvent>,
    vendor_accounts: HashMap<String, VendorAccount>,
}

/// Process-local store behind the same repository traits as Postgres.
///
/// Every conditional write checks and mutates under one write guard, which
/// gives the same atomicity the SQL statements get from a single `UPDATE`.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DepartureRepository for MemoryStore {
    async fn get(&self, id: Uuid) -> StoreResult<Option<Departure>> {
        Ok(self.tables.read().await.departures.get(&id).cloned())
    }

    async fn list_by_plan(&self, plan_id: Uuid) -> StoreResult<Vec<Departure>> {
        let tables = self.tables.read().await;
        let mut departures: Vec<Departure> = tables
            .departures
            .values()
            .filter(|d| d.plan_id == plan_id)
            .cloned()
            .collect();
        departures.sort_by_key(|d| d.departure_date);
        Ok(departures)
    }

    async fn insert(&self, departure: &Departure) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.departures.contains_key(&departure.id) {
            return Err(StoreError::DuplicateId(departure.id.to_string()));
        }
        tables.departures.insert(departure.id, departure.clone());
        Ok(())
    }

    async fn reserve(&self, id: Uuid, count: u32) -> StoreResult<Departure> {
        let mut tables = self.tables.write().await;
        let departure = tables
            .departures
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("departure {}", id)))?;

        let available = departure.available_seats();
        if count > available {
            return Err(StoreError::CapacityExceeded { departure_id: id, requested: count, available });
        }
        departure.booked_seats += count;
        Ok(departure.clone())
    }

    async fn release(&self, id: Uuid, count: u32) -> StoreResult<Departure> {
        let mut tables = self.tables.write().await;
        let departure = tables
            .departures
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("departure {}", id)))?;

        departure.booked_seats = departure.booked_seats.saturating_sub(count);
        Ok(departure.clone())
    }
}

#[async_trait]
impl BookingRepository for MemoryStore {
    async fn create(&self, booking: &Booking) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.bookings.contains_key(&booking.id) {
            return Err(StoreError::DuplicateId(booking.id.to_string()));
        }
        tables.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        Ok(self.tables.read().await.bookings.get(&id).cloned())
    }

    async fn list_by_user(&self, user_id: &str) -> StoreResult<Vec<Booking>> {
        let tables = self.tables.read().await;
        let mut bookings: Vec<Booking> = tables
            .bookings
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookings)
    }

    async fn find_by_payment_id(&self, payment_id: &str) -> StoreResult<Option<Booking>> {
        let tables = self.tables.read().await;
        Ok(tables
            .bookings
            .values()
            .find(|b| b.gateway_payment_id.as_deref() == Some(payment_id))
            .cloned())
    }

    async fn find_by_order_id(&self, order_id: &str) -> StoreResult<Option<Booking>> {
        let tables = self.tables.read().await;
        Ok(tables
            .bookings
            .values()
            .find(|b| b.gateway_order_id.as_deref() == Some(order_id))
            .cloned())
    }

    async fn update(&self, id: Uuid, patch: &BookingPatch) -> StoreResult<Booking> {
        let mut tables = self.tables.write().await;
        let booking = tables
            .bookings
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("booking {}", id)))?;
        booking.apply(patch);
        Ok(booking.clone())
    }

    async fn update_if(
        &self,
        id: Uuid,
        condition: &BookingCondition,
        patch: &BookingPatch,
    ) -> StoreResult<Option<Booking>> {
        let mut tables = self.tables.write().await;
        let booking = tables
            .bookings
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("booking {}", id)))?;

        if !condition.matches(booking) {
            return Ok(None);
        }
        booking.apply(patch);
        Ok(Some(booking.clone()))
    }

    async fn record_change(&self, change: &BookingChangeEvent) -> StoreResult<()> {
        self.tables.write().await.changes.push(change.clone());
        Ok(())
    }

    async fn list_changes(&self, booking_id: Uuid) -> StoreResult<Vec<BookingChangeEvent>> {
        let tables = self.tables.read().await;
        Ok(tables
            .changes
            .iter()
            .filter(|c| c.booking_id == booking_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PlanRepository for MemoryStore {
    async fn get(&self, id: Uuid) -> StoreResult<Option<Plan>> {
        Ok(self.tables.read().await.plans.get(&id).cloned())
    }

    async fn insert(&self, plan: &Plan) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.plans.contains_key(&plan.id) {
            return Err(StoreError::DuplicateId(plan.id.to_string()));
        }
        tables.plans.insert(plan.id, plan.clone());
        Ok(())
    }
}

#[async_trait]
impl VendorRepository for MemoryStore {
    async fn payout_account(&self, vendor_id: &str) -> StoreResult<Option<VendorAccount>> {
        Ok(self.tables.read().await.vendor_accounts.get(vendor_id).cloned())
    }

    async fn upsert_account(&self, account: &VendorAccount) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .vendor_accounts
            .insert(account.vendor_id.clone(), account.clone());
        Ok(())
    }
}
