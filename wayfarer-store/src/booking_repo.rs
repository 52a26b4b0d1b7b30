use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;
use wayfarer_core::{
    Booking, BookingCondition, BookingPatch, BookingRepository, CancelledBy, StoreError,
    StoreResult,
};
use wayfarer_shared::{BookingChangeEvent, Masked};

use crate::database::{backend, insert_error, parse_status};

const BOOKING_COLUMNS: &str = "id, plan_id, departure_id, user_id, trip_date, num_people, \
     trip_cost, platform_fee, platform_cut, vendor_cut_percent, vendor_payout_amount, total_amount, \
     booking_status, payment_status, refund_status, refund_amount, refund_percentage, refund_date, \
     refund_id, vendor_payout_status, vendor_payout_date, transfer_id, gateway_order_id, \
     gateway_payment_id, gateway_signature, cancellation_reason, cancelled_by, cancelled_at, \
     created_at, updated_at";

pub struct PgBookingRepository {
    pool: PgPool,
}

impl PgBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(&self, column: &str, value: &str) -> StoreResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE {} = $1 ORDER BY created_at DESC LIMIT 1",
            BOOKING_COLUMNS, column
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(Booking::try_from).transpose()
    }

    async fn exists(&self, id: Uuid) -> StoreResult<bool> {
        let found: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM bookings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(found.is_some())
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    plan_id: Uuid,
    departure_id: Uuid,
    user_id: String,
    trip_date: DateTime<Utc>,
    num_people: i32,
    trip_cost: i64,
    platform_fee: i64,
    platform_cut: i64,
    vendor_cut_percent: i16,
    vendor_payout_amount: Option<i64>,
    total_amount: i64,
    booking_status: String,
    payment_status: String,
    refund_status: String,
    refund_amount: Option<i64>,
    refund_percentage: Option<i16>,
    refund_date: Option<DateTime<Utc>>,
    refund_id: Option<String>,
    vendor_payout_status: String,
    vendor_payout_date: Option<DateTime<Utc>>,
    transfer_id: Option<String>,
    gateway_order_id: Option<String>,
    gateway_payment_id: Option<String>,
    gateway_signature: Option<String>,
    cancellation_reason: Option<String>,
    cancelled_by: Option<String>,
    cancelled_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            plan_id: row.plan_id,
            departure_id: row.departure_id,
            user_id: row.user_id,
            trip_date: row.trip_date,
            num_people: row.num_people.max(0) as u32,
            trip_cost: row.trip_cost,
            platform_fee: row.platform_fee,
            platform_cut: row.platform_cut,
            vendor_cut_percent: row.vendor_cut_percent.clamp(0, 100) as u8,
            vendor_payout_amount: row.vendor_payout_amount,
            total_amount: row.total_amount,
            booking_status: parse_status(&row.booking_status)?,
            payment_status: parse_status(&row.payment_status)?,
            refund_status: parse_status(&row.refund_status)?,
            refund_amount: row.refund_amount,
            refund_percentage: row.refund_percentage.map(|p| p.clamp(0, 100) as u8),
            refund_date: row.refund_date,
            refund_id: row.refund_id,
            vendor_payout_status: parse_status(&row.vendor_payout_status)?,
            vendor_payout_date: row.vendor_payout_date,
            transfer_id: row.transfer_id,
            gateway_order_id: row.gateway_order_id,
            gateway_payment_id: row.gateway_payment_id,
            gateway_signature: row.gateway_signature.map(Masked::new),
            cancellation_reason: row.cancellation_reason,
            cancelled_by: row.cancelled_by.as_deref().map(parse_status::<CancelledBy>).transpose()?,
            cancelled_at: row.cancelled_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ChangeRow {
    booking_id: Uuid,
    action: String,
    actor: String,
    from_status: Option<String>,
    to_status: Option<String>,
    note: Option<String>,
    occurred_at: DateTime<Utc>,
}

/// Appends `, column = $n` for every field the patch sets.
fn push_patch(qb: &mut QueryBuilder<'_, Postgres>, patch: &BookingPatch) {
    qb.push("UPDATE bookings SET updated_at = NOW()");

    macro_rules! set {
        ($column:literal, $value:expr) => {
            if let Some(value) = $value {
                qb.push(concat!(", ", $column, " = ")).push_bind(value);
            }
        };
    }

    set!("booking_status", patch.booking_status.map(|s| s.as_str()));
    set!("payment_status", patch.payment_status.map(|s| s.as_str()));
    set!("refund_status", patch.refund_status.map(|s| s.as_str()));
    set!("refund_amount", patch.refund_amount);
    set!("refund_percentage", patch.refund_percentage.map(i16::from));
    set!("refund_date", patch.refund_date);
    set!("refund_id", patch.refund_id.clone());
    set!("vendor_payout_status", patch.vendor_payout_status.map(|s| s.as_str()));
    set!("vendor_payout_amount", patch.vendor_payout_amount);
    set!("vendor_payout_date", patch.vendor_payout_date);
    set!("transfer_id", patch.transfer_id.clone());
    set!("gateway_order_id", patch.gateway_order_id.clone());
    set!("gateway_payment_id", patch.gateway_payment_id.clone());
    set!("gateway_signature", patch.gateway_signature.clone());
    set!("cancellation_reason", patch.cancellation_reason.clone());
    set!("cancelled_by", patch.cancelled_by.map(|s| s.as_str()));
    set!("cancelled_at", patch.cancelled_at);
}

/// Appends the status preconditions. Empty sets add nothing.
fn push_condition(qb: &mut QueryBuilder<'_, Postgres>, condition: &BookingCondition) {
    fn any_of<T: ToString>(
        qb: &mut QueryBuilder<'_, Postgres>,
        column: &str,
        values: &[T],
    ) {
        if values.is_empty() {
            return;
        }
        let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        qb.push(" AND ").push(column).push(" = ANY(").push_bind(values).push(")");
    }

    any_of(qb, "booking_status", &condition.booking_status_in);
    any_of(qb, "payment_status", &condition.payment_status_in);
    any_of(qb, "refund_status", &condition.refund_status_in);
    any_of(qb, "vendor_payout_status", &condition.payout_status_in);
    if condition.order_id_absent {
        qb.push(" AND gateway_order_id IS NULL");
    }
}

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn create(&self, booking: &Booking) -> StoreResult<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO bookings ({})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30)
            "#,
            BOOKING_COLUMNS
        ))
        .bind(booking.id)
        .bind(booking.plan_id)
        .bind(booking.departure_id)
        .bind(&booking.user_id)
        .bind(booking.trip_date)
        .bind(booking.num_people as i32)
        .bind(booking.trip_cost)
        .bind(booking.platform_fee)
        .bind(booking.platform_cut)
        .bind(i16::from(booking.vendor_cut_percent))
        .bind(booking.vendor_payout_amount)
        .bind(booking.total_amount)
        .bind(booking.booking_status.as_str())
        .bind(booking.payment_status.as_str())
        .bind(booking.refund_status.as_str())
        .bind(booking.refund_amount)
        .bind(booking.refund_percentage.map(i16::from))
        .bind(booking.refund_date)
        .bind(&booking.refund_id)
        .bind(booking.vendor_payout_status.as_str())
        .bind(booking.vendor_payout_date)
        .bind(&booking.transfer_id)
        .bind(&booking.gateway_order_id)
        .bind(&booking.gateway_payment_id)
        .bind(booking.gateway_signature.as_ref().map(|s| s.expose().clone()))
        .bind(&booking.cancellation_reason)
        .bind(booking.cancelled_by.map(|c| c.as_str()))
        .bind(booking.cancelled_at)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(e, &booking.id.to_string()))?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE id = $1",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(Booking::try_from).transpose()
    }

    async fn list_by_user(&self, user_id: &str) -> StoreResult<Vec<Booking>> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE user_id = $1 ORDER BY created_at DESC",
            BOOKING_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(Booking::try_from).collect()
    }

    async fn find_by_payment_id(&self, payment_id: &str) -> StoreResult<Option<Booking>> {
        self.fetch_one_where("gateway_payment_id", payment_id).await
    }

    async fn find_by_order_id(&self, order_id: &str) -> StoreResult<Option<Booking>> {
        self.fetch_one_where("gateway_order_id", order_id).await
    }

    async fn update(&self, id: Uuid, patch: &BookingPatch) -> StoreResult<Booking> {
        let mut qb = QueryBuilder::<Postgres>::new("");
        push_patch(&mut qb, patch);
        qb.push(" WHERE id = ").push_bind(id);
        qb.push(" RETURNING ").push(BOOKING_COLUMNS);

        let row = qb
            .build_query_as::<BookingRow>()
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.map(Booking::try_from)
            .transpose()?
            .ok_or_else(|| StoreError::NotFound(format!("booking {}", id)))
    }

    async fn update_if(
        &self,
        id: Uuid,
        condition: &BookingCondition,
        patch: &BookingPatch,
    ) -> StoreResult<Option<Booking>> {
        let mut qb = QueryBuilder::<Postgres>::new("");
        push_patch(&mut qb, patch);
        qb.push(" WHERE id = ").push_bind(id);
        push_condition(&mut qb, condition);
        qb.push(" RETURNING ").push(BOOKING_COLUMNS);

        let row = qb
            .build_query_as::<BookingRow>()
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match row {
            Some(row) => Ok(Some(Booking::try_from(row)?)),
            None if self.exists(id).await? => Ok(None),
            None => Err(StoreError::NotFound(format!("booking {}", id))),
        }
    }

    async fn record_change(&self, change: &BookingChangeEvent) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO booking_changes (booking_id, action, actor, from_status, to_status, note, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(change.booking_id)
        .bind(&change.action)
        .bind(&change.actor)
        .bind(&change.from_status)
        .bind(&change.to_status)
        .bind(&change.note)
        .bind(change.occurred_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn list_changes(&self, booking_id: Uuid) -> StoreResult<Vec<BookingChangeEvent>> {
        let rows = sqlx::query_as::<_, ChangeRow>(
            r#"
            SELECT booking_id, action, actor, from_status, to_status, note, occurred_at
            FROM booking_changes
            WHERE booking_id = $1
            ORDER BY occurred_at ASC, id ASC
            "#,
        )
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows
            .into_iter()
            .map(|row| BookingChangeEvent {
                booking_id: row.booking_id,
                action: row.action,
                actor: row.actor,
                from_status: row.from_status,
                to_status: row.to_status,
                note: row.note,
                occurred_at: row.occurred_at,
            })
            .collect())
    }
}
