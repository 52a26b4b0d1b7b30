use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

status_enum! {
    /// Lifecycle of a scheduled departure.
    DepartureStatus {
        Scheduled => "scheduled",
        Confirmed => "confirmed",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

/// A dated occurrence of a plan with its own seat inventory.
///
/// `booked_seats` is only ever changed through
/// [`DepartureRepository::reserve`](crate::repository::DepartureRepository::reserve)
/// and [`release`](crate::repository::DepartureRepository::release).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Departure {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub departure_date: DateTime<Utc>,
    pub pickup_time: Option<String>,
    pub pickup_location: Option<String>,
    pub total_capacity: u32,
    pub booked_seats: u32,
    pub status: DepartureStatus,
    pub is_active: bool,
}

impl Departure {
    pub fn new(plan_id: Uuid, departure_date: DateTime<Utc>, total_capacity: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            plan_id,
            departure_date,
            pickup_time: None,
            pickup_location: None,
            total_capacity,
            booked_seats: 0,
            status: DepartureStatus::Scheduled,
            is_active: true,
        }
    }

    pub fn available_seats(&self) -> u32 {
        self.total_capacity.saturating_sub(self.booked_seats)
    }

    /// Open for new bookings: active, scheduled or confirmed, and still ahead.
    pub fn is_bookable(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && matches!(self.status, DepartureStatus::Scheduled | DepartureStatus::Confirmed)
            && self.departure_date > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_available_seats_never_underflows() {
        let mut departure = Departure::new(Uuid::new_v4(), Utc::now(), 5);
        departure.booked_seats = 7;
        assert_eq!(departure.available_seats(), 0);

        departure.booked_seats = 2;
        assert_eq!(departure.available_seats(), 3);
    }

    #[test]
    fn test_bookable_window() {
        let now = Utc::now();
        let mut departure = Departure::new(Uuid::new_v4(), now + Duration::days(3), 10);
        assert!(departure.is_bookable(now));

        departure.status = DepartureStatus::Completed;
        assert!(!departure.is_bookable(now));

        departure.status = DepartureStatus::Scheduled;
        departure.departure_date = now - Duration::hours(1);
        assert!(!departure.is_bookable(now));
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(DepartureStatus::Cancelled.as_str(), "cancelled");
        assert_eq!("confirmed".parse::<DepartureStatus>(), Ok(DepartureStatus::Confirmed));
        assert!("gone".parse::<DepartureStatus>().is_err());
    }
}
