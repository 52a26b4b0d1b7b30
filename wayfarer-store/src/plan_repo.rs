use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;
use wayfarer_core::{Plan, PlanRepository, StoreResult, VendorAccount, VendorRepository};
use wayfarer_shared::Masked;

use crate::database::{backend, insert_error};

/// Plans and the vendor payout accounts behind them.
pub struct PgPlanRepository {
    pool: PgPool,
}

impl PgPlanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PlanRow {
    id: Uuid,
    vendor_id: String,
    name: String,
    price: i64,
    is_active: bool,
    vendor_cut_percent: Option<i16>,
}

impl From<PlanRow> for Plan {
    fn from(row: PlanRow) -> Self {
        Plan {
            id: row.id,
            vendor_id: row.vendor_id,
            name: row.name,
            price: row.price,
            is_active: row.is_active,
            vendor_cut_percent: row.vendor_cut_percent.map(|p| p.clamp(0, 100) as u8),
        }
    }
}

#[async_trait]
impl PlanRepository for PgPlanRepository {
    async fn get(&self, id: Uuid) -> StoreResult<Option<Plan>> {
        let row = sqlx::query_as::<_, PlanRow>(
            "SELECT id, vendor_id, name, price, is_active, vendor_cut_percent FROM plans WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.map(Plan::from))
    }

    async fn insert(&self, plan: &Plan) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO plans (id, vendor_id, name, price, is_active, vendor_cut_percent) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(plan.id)
        .bind(&plan.vendor_id)
        .bind(&plan.name)
        .bind(plan.price)
        .bind(plan.is_active)
        .bind(plan.vendor_cut_percent.map(i16::from))
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(e, &plan.id.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl VendorRepository for PgPlanRepository {
    async fn payout_account(&self, vendor_id: &str) -> StoreResult<Option<VendorAccount>> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT vendor_id, account_id FROM vendor_accounts WHERE vendor_id = $1")
                .bind(vendor_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;

        Ok(row.map(|(vendor_id, account_id)| VendorAccount {
            vendor_id,
            account_id: Masked::new(account_id),
        }))
    }

    async fn upsert_account(&self, account: &VendorAccount) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO vendor_accounts (vendor_id, account_id)
            VALUES ($1, $2)
            ON CONFLICT (vendor_id) DO UPDATE SET account_id = EXCLUDED.account_id, updated_at = NOW()
            "#,
        )
        .bind(&account.vendor_id)
        .bind(account.account_id.expose())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}
