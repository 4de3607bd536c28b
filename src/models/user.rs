use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const FREE_LIMIT: i64 = 3;
pub const PRO_LIMIT: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Pro,
}

impl Plan {
    /// Two independent code paths (profile creation and the billing webhook)
    /// may set either `plan` or `is_pro`; an explicit plan value wins,
    /// otherwise the boolean decides.
    pub fn normalize(stored: Option<Plan>, is_pro: bool) -> Plan {
        match stored {
            Some(plan) => plan,
            None if is_pro => Plan::Pro,
            None => Plan::Free,
        }
    }

    pub fn default_limit(self) -> i64 {
        match self {
            Plan::Free => FREE_LIMIT,
            Plan::Pro => PRO_LIMIT,
        }
    }
}

/// Per-user daily usage counter. `day` is the reset boundary: whenever the
/// stored day is not today, `uploads_used` is reset to 0 before any ledger
/// decision is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaState {
    pub day: NaiveDate,
    pub uploads_used: i64,
    pub uploads_limit: i64,
}

impl QuotaState {
    pub fn fresh(day: NaiveDate, limit: i64) -> Self {
        QuotaState {
            day,
            uploads_used: 0,
            uploads_limit: limit,
        }
    }

    pub fn remaining(&self) -> i64 {
        (self.uploads_limit - self.uploads_used).max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: String,
    pub email: String,
    pub display_name: String,
    pub plan: Plan,
    pub is_pro: bool,
    pub quota: QuotaState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_plan_wins_over_is_pro_flag() {
        assert_eq!(Plan::normalize(Some(Plan::Free), true), Plan::Free);
        assert_eq!(Plan::normalize(Some(Plan::Pro), false), Plan::Pro);
        assert_eq!(Plan::normalize(None, true), Plan::Pro);
        assert_eq!(Plan::normalize(None, false), Plan::Free);
    }

    #[test]
    fn plan_limits() {
        assert_eq!(Plan::Free.default_limit(), FREE_LIMIT);
        assert_eq!(Plan::Pro.default_limit(), PRO_LIMIT);
    }
}
