//! Tolerant structured-output parser for free-form model replies.
//!
//! The generation endpoint is asked for JSON but routinely wraps it in
//! commentary or code fences. This module extracts a best-effort object and
//! coerces every expected field independently, substituting the caller's
//! fallback value for anything missing or mistyped. Only total
//! unparseability surfaces as [`AppError::ParseFailure`].

use serde_json::Value;

use crate::errors::{AppError, Result};
use crate::models::{clamp_score, AnalysisResult, Condition, Confidence};

pub fn parse_analysis(raw: &str, fallback: &AnalysisResult) -> Result<AnalysisResult> {
    let object = extract_object(raw)?;
    Ok(coerce_fields(&object, fallback))
}

/// Step 1: the whole text as a JSON object. Step 2: the substring between the
/// first `{` and the last `}`. Anything else is a `ParseFailure` carrying the
/// raw text for diagnostics.
fn extract_object(raw: &str) -> Result<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        if value.is_object() {
            return Ok(value);
        }
    }

    let open = raw.find('{');
    let close = raw.rfind('}');
    if let (Some(open), Some(close)) = (open, close) {
        if open < close {
            if let Ok(value) = serde_json::from_str::<Value>(&raw[open..=close]) {
                if value.is_object() {
                    return Ok(value);
                }
            }
        }
    }

    Err(AppError::ParseFailure {
        raw: raw.to_string(),
    })
}

fn coerce_fields(object: &Value, fallback: &AnalysisResult) -> AnalysisResult {
    AnalysisResult {
        title: string_field(object, "title").unwrap_or_else(|| fallback.title.clone()),
        seller_price: finite_field(object, "sellerPrice").or(fallback.seller_price),
        market_value: finite_field(object, "marketValue").unwrap_or(fallback.market_value),
        deal_score: finite_field(object, "dealScore")
            .map(clamp_score)
            .unwrap_or(fallback.deal_score),
        confidence: string_field(object, "confidence")
            .and_then(|s| Confidence::from_str_loose(&s))
            .unwrap_or(fallback.confidence),
        condition: string_field(object, "condition")
            .and_then(|s| Condition::from_str_loose(&s))
            .unwrap_or(fallback.condition),
        scam_flags: list_field(object, "scamFlags")
            .unwrap_or_else(|| fallback.scam_flags.clone()),
        negotiation_message: string_field(object, "negotiationMessage")
            .unwrap_or_else(|| fallback.negotiation_message.clone()),
        reasoning: list_field(object, "reasoning")
            .unwrap_or_else(|| fallback.reasoning.clone()),
    }
}

fn string_field(object: &Value, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn finite_field(object: &Value, key: &str) -> Option<f64> {
    object
        .get(key)
        .and_then(Value::as_f64)
        .filter(|n| n.is_finite())
}

fn list_field(object: &Value, key: &str) -> Option<Vec<String>> {
    let items = object.get(key)?.as_array()?;
    Some(items.iter().map(element_to_string).collect())
}

fn element_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
