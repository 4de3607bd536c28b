//! In-memory document store. Mirrors the transactional semantics of the
//! Postgres implementation with a single mutex per collection, which is
//! enough to serialize concurrent ledger steps in tests and local runs.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::Result;
use crate::ledger::{self, LedgerOutcome, PlanLimits};
use crate::models::{AnalysisResult, DealRecord, Plan, QuotaState};
use crate::store::{DealStore, LedgerOp, NewDeal, PlanUpgrade, ProfileRecord, ProfileStore};

#[derive(Default)]
pub struct MemoryStore {
    profiles: Mutex<HashMap<String, ProfileRecord>>,
    deals: Mutex<HashMap<String, Vec<DealRecord>>>,
    events: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/setup helper: insert or replace a profile verbatim.
    pub async fn put_profile(&self, record: ProfileRecord) {
        self.profiles
            .lock()
            .await
            .insert(record.uid.clone(), record);
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn fetch(&self, uid: &str) -> Result<Option<ProfileRecord>> {
        Ok(self.profiles.lock().await.get(uid).cloned())
    }

    async fn create(&self, record: &ProfileRecord) -> Result<()> {
        self.profiles
            .lock()
            .await
            .entry(record.uid.clone())
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn transact(
        &self,
        uid: &str,
        op: LedgerOp,
        today: NaiveDate,
        limits: PlanLimits,
    ) -> Result<Option<LedgerOutcome>> {
        let mut profiles = self.profiles.lock().await;
        let Some(record) = profiles.get(uid) else {
            return Ok(None);
        };

        let outcome = ledger::step(record, op, today, limits);
        profiles.insert(uid.to_string(), outcome.record.clone());
        Ok(Some(outcome))
    }

    async fn apply_upgrade(&self, event_id: &str, uid: &str, upgrade: &PlanUpgrade) -> Result<bool> {
        let mut events = self.events.lock().await;
        if events.contains(event_id) {
            return Ok(false);
        }

        let mut profiles = self.profiles.lock().await;
        let record = profiles
            .entry(uid.to_string())
            .or_insert_with(|| ProfileRecord::new(uid, "", ""));

        record.plan = Some(Plan::Pro);
        record.is_pro = true;
        if upgrade.reset_usage {
            record.quota = Some(QuotaState::fresh(upgrade.day, upgrade.uploads_limit));
        } else {
            let mut quota = record
                .quota
                .unwrap_or_else(|| QuotaState::fresh(Utc::now().date_naive(), upgrade.uploads_limit));
            quota.uploads_limit = upgrade.uploads_limit;
            record.quota = Some(quota);
        }
        if upgrade.stripe_customer_id.is_some() {
            record.stripe_customer_id = upgrade.stripe_customer_id.clone();
        }
        if upgrade.stripe_subscription_id.is_some() {
            record.stripe_subscription_id = upgrade.stripe_subscription_id.clone();
        }

        events.insert(event_id.to_string());
        Ok(true)
    }
}

#[async_trait]
impl DealStore for MemoryStore {
    async fn save(&self, uid: &str, deal: &NewDeal) -> Result<Uuid> {
        let id = deal.id.unwrap_or_else(Uuid::new_v4);
        let record = DealRecord {
            id,
            title: deal.title.clone(),
            seller_price: deal.seller_price,
            location: deal.location.clone(),
            image_url: deal.image_url.clone(),
            analysis: deal.analysis.clone(),
            created_at: Utc::now(),
        };

        let mut deals = self.deals.lock().await;
        let list = deals.entry(uid.to_string()).or_default();
        list.retain(|d| d.id != id);
        list.insert(0, record);
        Ok(id)
    }

    async fn list(&self, uid: &str, take: i64) -> Result<Vec<DealRecord>> {
        let deals = self.deals.lock().await;
        Ok(deals
            .get(uid)
            .map(|list| list.iter().take(take.max(0) as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn update_analysis(&self, uid: &str, deal_id: Uuid, analysis: &AnalysisResult) -> Result<bool> {
        let mut deals = self.deals.lock().await;
        if let Some(list) = deals.get_mut(uid) {
            if let Some(deal) = list.iter_mut().find(|d| d.id == deal_id) {
                deal.analysis = analysis.clone();
                return Ok(true);
            }
        }
        Ok(false)
    }
}
