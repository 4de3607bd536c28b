//! Document-store substrate for profiles, deals, and processed billing
//! events. The ledger and the webhook handler only ever touch storage
//! through these traits, so tests can swap in the in-memory implementation.

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::errors::Result;
use crate::ledger::{LedgerOutcome, PlanLimits};
use crate::models::{AnalysisResult, DealRecord, Plan, QuotaState};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::{Database, PgDealStore, PgProfileStore};

/// Raw stored shape of a user profile. `plan` and `quota` stay optional
/// here because independent writers (signup, webhook) may have set only
/// part of the document; the ledger normalizes on every read.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileRecord {
    pub uid: String,
    pub email: String,
    pub display_name: String,
    pub plan: Option<Plan>,
    pub is_pro: bool,
    pub quota: Option<QuotaState>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
}

impl ProfileRecord {
    pub fn new(uid: &str, email: &str, display_name: &str) -> Self {
        ProfileRecord {
            uid: uid.to_string(),
            email: email.to_string(),
            display_name: display_name.to_string(),
            plan: Some(Plan::Free),
            is_pro: false,
            quota: None,
            stripe_customer_id: None,
            stripe_subscription_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOp {
    Refresh,
    Consume,
}

/// Idempotent plan upgrade applied by billing webhooks. First purchase
/// resets the quota window; a recurring invoice only widens the ceiling.
#[derive(Debug, Clone)]
pub struct PlanUpgrade {
    pub reset_usage: bool,
    pub day: NaiveDate,
    pub uploads_limit: i64,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Plain read, no normalization, no mutation.
    async fn fetch(&self, uid: &str) -> Result<Option<ProfileRecord>>;

    /// Creates the profile document on first sign-in. Existing documents
    /// are left untouched.
    async fn create(&self, record: &ProfileRecord) -> Result<()>;

    /// Runs one [`crate::ledger::step`] atomically against the stored
    /// record. Concurrent calls for the same uid must serialize; `None`
    /// means the user does not exist.
    async fn transact(
        &self,
        uid: &str,
        op: LedgerOp,
        today: NaiveDate,
        limits: PlanLimits,
    ) -> Result<Option<LedgerOutcome>>;

    /// Upserts pro entitlement, gated on the webhook event id. Returns
    /// false when the id was already processed (redelivery). The id and the
    /// upgrade commit together, so a failed upgrade leaves the event
    /// eligible for redelivery. Creates the document if the webhook beat
    /// the first sign-in.
    async fn apply_upgrade(&self, event_id: &str, uid: &str, upgrade: &PlanUpgrade) -> Result<bool>;
}

#[derive(Debug, Clone)]
pub struct NewDeal {
    pub id: Option<Uuid>,
    pub title: String,
    pub seller_price: Option<f64>,
    pub location: Option<String>,
    pub image_url: Option<String>,
    pub analysis: AnalysisResult,
}

#[async_trait]
pub trait DealStore: Send + Sync {
    /// Persists a deal under the user; an explicit id overwrites in place.
    async fn save(&self, uid: &str, deal: &NewDeal) -> Result<Uuid>;

    /// Newest-first listing, bounded by `take`.
    async fn list(&self, uid: &str, take: i64) -> Result<Vec<DealRecord>>;

    /// Overwrites the analysis of an existing deal. Returns false when the
    /// deal does not exist.
    async fn update_analysis(&self, uid: &str, deal_id: Uuid, analysis: &AnalysisResult) -> Result<bool>;
}
