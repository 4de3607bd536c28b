use axum::{extract::State, Json};
use tracing::{info, warn};

use crate::{
    errors::{AppError, Result},
    handlers::AppState,
    models::{AnalysisResult, ListingInput},
    services::{fallback::fallback_analysis, parser::parse_analysis, vision},
};

/// Runs one listing analysis. The user-visible contract is "always get an
/// assessment": every failure past request validation degrades to the
/// deterministic fallback with HTTP 200.
pub async fn analyze(
    State(state): State<AppState>,
    Json(input): Json<ListingInput>,
) -> Result<Json<AnalysisResult>> {
    if input
        .image_url
        .as_deref()
        .map(str::trim)
        .unwrap_or("")
        .is_empty()
    {
        return Err(AppError::Validation("Missing imageUrl".to_string()));
    }

    let fallback = fallback_analysis(&input);

    let Some(model) = &state.vision else {
        // No generation endpoint configured; the fallback is the product.
        return Ok(Json(fallback));
    };

    let prompt = vision::build_prompt(&input);
    let image_url = input.image_url.as_deref().unwrap_or_default();

    let result = match model.generate(&prompt, image_url).await {
        Ok(text) => match parse_analysis(&text, &fallback) {
            Ok(result) => {
                info!(deal_score = result.deal_score, "model analysis accepted");
                result
            }
            Err(AppError::ParseFailure { raw }) => {
                warn!(chars = raw.len(), "model output had no extractable JSON");
                fallback
            }
            Err(other) => return Err(other),
        },
        Err(AppError::RateLimited) => {
            warn!("generation endpoint rate limited; serving fallback");
            let mut result = fallback;
            result
                .reasoning
                .push("The analysis service is briefly rate limited; this is a heuristic estimate.".to_string());
            result
        }
        Err(err) => {
            warn!("generation endpoint failed: {}; serving fallback", err);
            fallback
        }
    };

    Ok(Json(result))
}
