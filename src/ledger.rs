//! Quota & entitlement ledger.
//!
//! Gates the billable analyze action behind a per-day counter whose ceiling
//! depends on the user's plan. The decision logic lives in the pure
//! [`step`] function; every [`ProfileStore`] implementation runs it inside
//! its own transaction primitive so concurrent consumes for the same user
//! serialize and the free ceiling is never overspent.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};

use crate::errors::Result;
use crate::models::{Plan, QuotaState, UserProfile, FREE_LIMIT, PRO_LIMIT};
use crate::store::{LedgerOp, ProfileRecord, ProfileStore};

#[derive(Debug, Clone, Copy)]
pub struct PlanLimits {
    pub free: i64,
    pub pro: i64,
}

impl Default for PlanLimits {
    fn default() -> Self {
        PlanLimits {
            free: FREE_LIMIT,
            pro: PRO_LIMIT,
        }
    }
}

impl PlanLimits {
    pub fn for_plan(&self, plan: Plan) -> i64 {
        match plan {
            Plan::Free => self.free,
            Plan::Pro => self.pro,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LedgerOutcome {
    pub blocked: bool,
    pub record: ProfileRecord,
}

/// One normalized read-modify-write step of the ledger.
///
/// Applies plan/is_pro reconciliation, the day-rollover reset, and (for
/// consume) the admit-or-block decision. Returns the record to persist;
/// the rollover is persisted even when the consume is blocked.
pub fn step(record: &ProfileRecord, op: LedgerOp, today: NaiveDate, limits: PlanLimits) -> LedgerOutcome {
    let is_pro = record.is_pro;
    let plan = Plan::normalize(record.plan, is_pro);

    // A stored ceiling survives rollover for free users (it may have been
    // widened by an admin); pro users always reset to the pro ceiling.
    let base_limit = record
        .quota
        .map(|q| q.uploads_limit)
        .unwrap_or_else(|| limits.for_plan(plan));
    let reset_limit = if plan == Plan::Pro { limits.pro } else { base_limit };

    let stored = record.quota.unwrap_or_else(|| QuotaState::fresh(today, base_limit));
    let same_day = stored.day == today;

    let (blocked, quota) = match op {
        LedgerOp::Refresh => {
            let quota = if same_day {
                QuotaState {
                    day: stored.day,
                    uploads_used: stored.uploads_used,
                    uploads_limit: base_limit,
                }
            } else {
                QuotaState::fresh(today, reset_limit)
            };
            (false, quota)
        }
        LedgerOp::Consume => {
            let used = if same_day { stored.uploads_used } else { 0 };
            let limit = reset_limit;
            let blocked = plan != Plan::Pro && used >= limit;
            let quota = QuotaState {
                day: today,
                uploads_used: if blocked { used } else { used + 1 },
                uploads_limit: limit,
            };
            (blocked, quota)
        }
    };

    LedgerOutcome {
        blocked,
        record: ProfileRecord {
            plan: Some(plan),
            is_pro,
            quota: Some(quota),
            ..record.clone()
        },
    }
}

/// Read-only normalization for display: reconcile plan/is_pro and default
/// any missing quota fields without mutating stored state.
pub fn normalize(record: &ProfileRecord, today: NaiveDate, limits: PlanLimits) -> UserProfile {
    let plan = Plan::normalize(record.plan, record.is_pro);
    let quota = record
        .quota
        .unwrap_or_else(|| QuotaState::fresh(today, limits.for_plan(plan)));

    UserProfile {
        uid: record.uid.clone(),
        email: record.email.clone(),
        display_name: record.display_name.clone(),
        plan,
        is_pro: record.is_pro,
        quota,
    }
}

#[derive(Debug, Clone)]
pub struct ConsumeDecision {
    pub blocked: bool,
    pub profile: Option<UserProfile>,
}

#[derive(Clone)]
pub struct QuotaLedger {
    store: Arc<dyn ProfileStore>,
    limits: PlanLimits,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn ProfileStore>, limits: PlanLimits) -> Self {
        QuotaLedger { store, limits }
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    /// Reloads the profile, persisting a day-rollover correction if one is
    /// due. `None` means the user has not signed up yet.
    pub async fn refresh(&self, uid: &str) -> Result<Option<UserProfile>> {
        let today = Self::today();
        let outcome = self
            .store
            .transact(uid, LedgerOp::Refresh, today, self.limits)
            .await?;
        Ok(outcome.map(|o| normalize(&o.record, today, self.limits)))
    }

    /// Atomically admits or blocks one upload. The rollover (and, when
    /// admitted, the increment) is always persisted.
    pub async fn consume(&self, uid: &str) -> Result<ConsumeDecision> {
        let today = Self::today();
        let outcome = self
            .store
            .transact(uid, LedgerOp::Consume, today, self.limits)
            .await?;
        Ok(match outcome {
            Some(o) => ConsumeDecision {
                blocked: o.blocked,
                profile: Some(normalize(&o.record, today, self.limits)),
            },
            None => ConsumeDecision {
                blocked: true,
                profile: None,
            },
        })
    }

    /// Plain read with display normalization, no stored-state mutation.
    pub async fn profile(&self, uid: &str) -> Result<Option<UserProfile>> {
        let today = Self::today();
        let record = self.store.fetch(uid).await?;
        Ok(record.map(|r| normalize(&r, today, self.limits)))
    }
}
