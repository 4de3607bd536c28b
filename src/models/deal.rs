use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Normalized output of one analysis call. Every field is always populated;
/// anything the model fails to produce is back-filled from the deterministic
/// fallback before the record leaves the analysis path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub title: String,
    pub seller_price: Option<f64>,
    pub market_value: f64,
    pub deal_score: i64,
    pub confidence: Confidence,
    pub condition: Condition,
    pub scam_flags: Vec<String>,
    pub negotiation_message: String,
    pub reasoning: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Confidence::Low),
            "medium" => Some(Confidence::Medium),
            "high" => Some(Confidence::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl Condition {
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "poor" => Some(Condition::Poor),
            "fair" => Some(Condition::Fair),
            "good" => Some(Condition::Good),
            "excellent" => Some(Condition::Excellent),
            _ => None,
        }
    }
}

pub fn clamp_score(score: f64) -> i64 {
    score.round().clamp(0.0, 100.0) as i64
}

/// A persisted analysis, stored as a child record of a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealRecord {
    pub id: Uuid,
    pub title: String,
    pub seller_price: Option<f64>,
    pub location: Option<String>,
    pub image_url: Option<String>,
    pub analysis: AnalysisResult,
    pub created_at: DateTime<Utc>,
}

/// Inputs available to the analysis path without the model: the form fields
/// the client sent plus any pre-extracted listing text.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingInput {
    pub title: Option<String>,
    pub seller_price: Option<f64>,
    pub location: Option<String>,
    pub image_url: Option<String>,
    pub image_text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_literals_parse_case_insensitively() {
        assert_eq!(Condition::from_str_loose("Good"), Some(Condition::Good));
        assert_eq!(Condition::from_str_loose("EXCELLENT"), Some(Condition::Excellent));
        assert_eq!(Condition::from_str_loose("mint"), None);
        assert_eq!(Confidence::from_str_loose(" high "), Some(Confidence::High));
        assert_eq!(Confidence::from_str_loose("certain"), None);
    }

    #[test]
    fn score_clamps_to_unit_range() {
        assert_eq!(clamp_score(-5.0), 0);
        assert_eq!(clamp_score(72.4), 72);
        assert_eq!(clamp_score(140.0), 100);
    }

    #[test]
    fn analysis_result_serializes_camel_case() {
        let result = AnalysisResult {
            title: "Chair".to_string(),
            seller_price: Some(100.0),
            market_value: 500.0,
            deal_score: 80,
            confidence: Confidence::Medium,
            condition: Condition::Good,
            scam_flags: vec![],
            negotiation_message: String::new(),
            reasoning: vec![],
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["dealScore"], 80);
        assert_eq!(json["marketValue"], 500.0);
        assert_eq!(json["condition"], "good");
        assert_eq!(json["confidence"], "medium");
    }
}
