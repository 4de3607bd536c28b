use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{postgres::PgPoolOptions, types::Json, FromRow, PgPool};
use uuid::Uuid;

use crate::errors::Result;
use crate::ledger::{self, LedgerOutcome, PlanLimits};
use crate::models::{AnalysisResult, DealRecord, Plan, QuotaState};
use crate::store::{DealStore, LedgerOp, NewDeal, PlanUpgrade, ProfileRecord, ProfileStore};

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await?;

        Ok(Database { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("migration failed: {}", e))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn profiles(&self) -> PgProfileStore {
        PgProfileStore {
            pool: self.pool.clone(),
        }
    }

    pub fn deals(&self) -> PgDealStore {
        PgDealStore {
            pool: self.pool.clone(),
        }
    }
}

#[derive(Clone)]
pub struct PgProfileStore {
    pool: PgPool,
}

#[derive(FromRow)]
struct UserRow {
    uid: String,
    email: String,
    display_name: String,
    plan: Option<String>,
    is_pro: bool,
    quota_day: Option<NaiveDate>,
    uploads_used: Option<i64>,
    uploads_limit: Option<i64>,
    stripe_customer_id: Option<String>,
    stripe_subscription_id: Option<String>,
}

const USER_COLUMNS: &str = "uid, email, display_name, plan, is_pro, quota_day, uploads_used, \
                            uploads_limit, stripe_customer_id, stripe_subscription_id";

impl From<UserRow> for ProfileRecord {
    fn from(row: UserRow) -> Self {
        let plan = match row.plan.as_deref() {
            Some("pro") => Some(Plan::Pro),
            Some("free") => Some(Plan::Free),
            _ => None,
        };
        let quota = match (row.quota_day, row.uploads_used, row.uploads_limit) {
            (Some(day), Some(uploads_used), Some(uploads_limit)) => Some(QuotaState {
                day,
                uploads_used,
                uploads_limit,
            }),
            _ => None,
        };
        ProfileRecord {
            uid: row.uid,
            email: row.email,
            display_name: row.display_name,
            plan,
            is_pro: row.is_pro,
            quota,
            stripe_customer_id: row.stripe_customer_id,
            stripe_subscription_id: row.stripe_subscription_id,
        }
    }
}

fn plan_str(plan: Option<Plan>) -> Option<&'static str> {
    plan.map(|p| match p {
        Plan::Free => "free",
        Plan::Pro => "pro",
    })
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn fetch(&self, uid: &str) -> Result<Option<ProfileRecord>> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE uid = $1",
            USER_COLUMNS
        ))
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ProfileRecord::from))
    }

    async fn create(&self, record: &ProfileRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (uid, email, display_name, plan, is_pro)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (uid) DO NOTHING
            "#,
        )
        .bind(&record.uid)
        .bind(&record.email)
        .bind(&record.display_name)
        .bind(plan_str(record.plan))
        .bind(record.is_pro)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn transact(
        &self,
        uid: &str,
        op: LedgerOp,
        today: NaiveDate,
        limits: PlanLimits,
    ) -> Result<Option<LedgerOutcome>> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes concurrent consumes for the same user; the
        // free ceiling can never be overspent by interleaved reads.
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE uid = $1 FOR UPDATE",
            USER_COLUMNS
        ))
        .bind(uid)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let record = ProfileRecord::from(row);
        let outcome = ledger::step(&record, op, today, limits);
        let quota = outcome
            .record
            .quota
            .ok_or_else(|| anyhow::anyhow!("ledger step produced no quota"))?;

        sqlx::query(
            r#"
            UPDATE users
            SET plan = $2, is_pro = $3, quota_day = $4, uploads_used = $5,
                uploads_limit = $6, updated_at = NOW()
            WHERE uid = $1
            "#,
        )
        .bind(uid)
        .bind(plan_str(outcome.record.plan))
        .bind(outcome.record.is_pro)
        .bind(quota.day)
        .bind(quota.uploads_used)
        .bind(quota.uploads_limit)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(outcome))
    }

    async fn apply_upgrade(&self, event_id: &str, uid: &str, upgrade: &PlanUpgrade) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // The event id and the upgrade commit or roll back together; a
        // failed upgrade leaves the event unrecorded for redelivery.
        let inserted = sqlx::query(
            "INSERT INTO processed_events (event_id) VALUES ($1) ON CONFLICT DO NOTHING",
        )
        .bind(event_id)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if upgrade.reset_usage {
            sqlx::query(
                r#"
                INSERT INTO users (uid, plan, is_pro, quota_day, uploads_used, uploads_limit,
                                   stripe_customer_id, stripe_subscription_id)
                VALUES ($1, 'pro', TRUE, $2, 0, $3, $4, $5)
                ON CONFLICT (uid) DO UPDATE
                SET plan = 'pro', is_pro = TRUE, quota_day = $2, uploads_used = 0,
                    uploads_limit = $3,
                    stripe_customer_id = COALESCE($4, users.stripe_customer_id),
                    stripe_subscription_id = COALESCE($5, users.stripe_subscription_id),
                    updated_at = NOW()
                "#,
            )
            .bind(uid)
            .bind(upgrade.day)
            .bind(upgrade.uploads_limit)
            .bind(&upgrade.stripe_customer_id)
            .bind(&upgrade.stripe_subscription_id)
            .execute(&mut *tx)
            .await?;
        } else {
            // Recurring invoice: widen the ceiling, leave today's usage alone.
            sqlx::query(
                r#"
                INSERT INTO users (uid, plan, is_pro, uploads_limit,
                                   stripe_customer_id, stripe_subscription_id)
                VALUES ($1, 'pro', TRUE, $2, $3, $4)
                ON CONFLICT (uid) DO UPDATE
                SET plan = 'pro', is_pro = TRUE, uploads_limit = $2,
                    stripe_customer_id = COALESCE($3, users.stripe_customer_id),
                    stripe_subscription_id = COALESCE($4, users.stripe_subscription_id),
                    updated_at = NOW()
                "#,
            )
            .bind(uid)
            .bind(upgrade.uploads_limit)
            .bind(&upgrade.stripe_customer_id)
            .bind(&upgrade.stripe_subscription_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }
}

#[derive(Clone)]
pub struct PgDealStore {
    pool: PgPool,
}

#[derive(FromRow)]
struct DealRow {
    id: Uuid,
    title: String,
    seller_price: Option<f64>,
    location: Option<String>,
    image_url: Option<String>,
    analysis: Json<AnalysisResult>,
    created_at: DateTime<Utc>,
}

impl From<DealRow> for DealRecord {
    fn from(row: DealRow) -> Self {
        DealRecord {
            id: row.id,
            title: row.title,
            seller_price: row.seller_price,
            location: row.location,
            image_url: row.image_url,
            analysis: row.analysis.0,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl DealStore for PgDealStore {
    async fn save(&self, uid: &str, deal: &NewDeal) -> Result<Uuid> {
        let id = deal.id.unwrap_or_else(Uuid::new_v4);

        sqlx::query(
            r#"
            INSERT INTO deals (id, owner_uid, title, seller_price, location, image_url, analysis)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET title = $3, seller_price = $4, location = $5, image_url = $6,
                analysis = $7, updated_at = NOW()
            "#,
        )
        .bind(id)
        .bind(uid)
        .bind(&deal.title)
        .bind(deal.seller_price)
        .bind(&deal.location)
        .bind(&deal.image_url)
        .bind(Json(&deal.analysis))
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn list(&self, uid: &str, take: i64) -> Result<Vec<DealRecord>> {
        let rows: Vec<DealRow> = sqlx::query_as(
            r#"
            SELECT id, title, seller_price, location, image_url, analysis, created_at
            FROM deals
            WHERE owner_uid = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(uid)
        .bind(take)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DealRecord::from).collect())
    }

    async fn update_analysis(&self, uid: &str, deal_id: Uuid, analysis: &AnalysisResult) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE deals SET analysis = $3, updated_at = NOW() WHERE id = $1 AND owner_uid = $2",
        )
        .bind(deal_id)
        .bind(uid)
        .bind(Json(analysis))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
