//! Deterministic fallback assessment, used whenever the generation endpoint
//! is unconfigured, unavailable, rate limited, or returns unparseable output.
//! Pure function of the request inputs so the analysis route can always
//! answer 200 with a fully populated record.

use crate::models::{AnalysisResult, Condition, Confidence, ListingInput};

const LOW_PRICE_THRESHOLD: f64 = 500.0;
const MARKET_FLOOR: f64 = 500.0;
const MARKET_DEFAULT: f64 = 1200.0;
const MARKUP: f64 = 1.12;

pub fn fallback_analysis(input: &ListingInput) -> AnalysisResult {
    let price_given = input.seller_price.is_some();
    let price = input
        .seller_price
        .filter(|p| p.is_finite())
        .unwrap_or(0.0);

    // Higher asking prices read as mildly less deal-like; the clamp keeps
    // the heuristic inside [35, 90] no matter the input.
    let deal_score = (80.0 - (price / 5000.0).min(20.0)).clamp(35.0, 90.0).round() as i64;

    let market_value = if price_given {
        (price * MARKUP).round().max(MARKET_FLOOR)
    } else {
        MARKET_DEFAULT
    };

    let location = input.location.as_deref().unwrap_or("").trim();
    let listing_text = input.image_text.as_deref().unwrap_or("").trim();

    let mut scam_flags = Vec::new();
    if location.is_empty() {
        scam_flags.push("Location not provided".to_string());
    }
    if listing_text.is_empty() {
        scam_flags.push("Limited listing details available".to_string());
    }
    if price > 0.0 && price < LOW_PRICE_THRESHOLD {
        scam_flags.push("Suspiciously low price".to_string());
    }

    let mut reasoning = Vec::new();
    reasoning.push(
        "Automated analysis was unavailable, so this assessment uses listing details only."
            .to_string(),
    );
    if price_given {
        reasoning.push(format!(
            "Asking price of {:.0} compared against an estimated market value of {:.0}.",
            price, market_value
        ));
    } else {
        reasoning.push("No asking price was provided; market value is a category baseline.".to_string());
    }
    if location.is_empty() {
        reasoning.push("Listing location was missing, which limits comparable searches.".to_string());
    } else {
        reasoning.push(format!("Listing location \"{}\" was taken into account.", location));
    }
    if listing_text.is_empty() {
        reasoning.push("No listing text was available to cross-check the photos.".to_string());
    } else {
        reasoning.push("Listing text was available and factored into the flags above.".to_string());
    }

    AnalysisResult {
        title: input
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("Marketplace listing")
            .to_string(),
        seller_price: price_given.then_some(price),
        market_value,
        deal_score,
        confidence: Confidence::Medium,
        condition: Condition::Good,
        scam_flags,
        negotiation_message:
            "Hi! I'm interested in your listing. Would you consider a slightly lower price \
             if I can pick it up quickly? Happy to be flexible on timing."
                .to_string(),
        reasoning,
    }
}
