use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;
use wayfarer_core::{Departure, DepartureRepository, StoreError, StoreResult};

use crate::database::{backend, insert_error, parse_status};

const DEPARTURE_COLUMNS: &str = "id, plan_id, departure_date, pickup_time, pickup_location, \
     total_capacity, booked_seats, status, is_active";

pub struct PgDepartureRepository {
    pool: PgPool,
}

impl PgDepartureRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct DepartureRow {
    id: Uuid,
    plan_id: Uuid,
    departure_date: DateTime<Utc>,
    pickup_time: Option<String>,
    pickup_location: Option<String>,
    total_capacity: i32,
    booked_seats: i32,
    status: String,
    is_active: bool,
}

impl TryFrom<DepartureRow> for Departure {
    type Error = StoreError;

    fn try_from(row: DepartureRow) -> Result<Self, Self::Error> {
        Ok(Departure {
            id: row.id,
            plan_id: row.plan_id,
            departure_date: row.departure_date,
            pickup_time: row.pickup_time,
            pickup_location: row.pickup_location,
            total_capacity: row.total_capacity.max(0) as u32,
            booked_seats: row.booked_seats.max(0) as u32,
            status: parse_status(&row.status)?,
            is_active: row.is_active,
        })
    }
}

#[async_trait]
impl DepartureRepository for PgDepartureRepository {
    async fn get(&self, id: Uuid) -> StoreResult<Option<Departure>> {
        let row = sqlx::query_as::<_, DepartureRow>(&format!(
            "SELECT {} FROM departures WHERE id = $1",
            DEPARTURE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(Departure::try_from).transpose()
    }

    async fn list_by_plan(&self, plan_id: Uuid) -> StoreResult<Vec<Departure>> {
        let rows = sqlx::query_as::<_, DepartureRow>(&format!(
            "SELECT {} FROM departures WHERE plan_id = $1 ORDER BY departure_date ASC",
            DEPARTURE_COLUMNS
        ))
        .bind(plan_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(Departure::try_from).collect()
    }

    async fn insert(&self, departure: &Departure) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO departures (id, plan_id, departure_date, pickup_time, pickup_location,
                                    total_capacity, booked_seats, status, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(departure.id)
        .bind(departure.plan_id)
        .bind(departure.departure_date)
        .bind(&departure.pickup_time)
        .bind(&departure.pickup_location)
        .bind(departure.total_capacity as i32)
        .bind(departure.booked_seats as i32)
        .bind(departure.status.as_str())
        .bind(departure.is_active)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(e, &departure.id.to_string()))?;
        Ok(())
    }

    async fn reserve(&self, id: Uuid, count: u32) -> StoreResult<Departure> {
        // The capacity check and the increment are one statement.
        let row = sqlx::query_as::<_, DepartureRow>(&format!(
            r#"
            UPDATE departures
            SET booked_seats = booked_seats + $2, updated_at = NOW()
            WHERE id = $1 AND booked_seats + $2 <= total_capacity
            RETURNING {}
            "#,
            DEPARTURE_COLUMNS
        ))
        .bind(id)
        .bind(count as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(row) => Departure::try_from(row),
            None => match self.get(id).await? {
                Some(current) => Err(StoreError::CapacityExceeded {
                    departure_id: id,
                    requested: count,
                    available: current.available_seats(),
                }),
                None => Err(StoreError::NotFound(format!("departure {}", id))),
            },
        }
    }

    async fn release(&self, id: Uuid, count: u32) -> StoreResult<Departure> {
        let row = sqlx::query_as::<_, DepartureRow>(&format!(
            r#"
            UPDATE departures
            SET booked_seats = GREATEST(booked_seats - $2, 0), updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            DEPARTURE_COLUMNS
        ))
        .bind(id)
        .bind(count as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(Departure::try_from)
            .transpose()?
            .ok_or_else(|| StoreError::NotFound(format!("departure {}", id)))
    }
}
