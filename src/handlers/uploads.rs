use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::{
    errors::{AppError, Result},
    handlers::AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub user_id: String,
    pub image_data_url: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub url: String,
}

/// Stores a base64 screenshot data URL and returns a servable URL the
/// analysis request can reference.
pub async fn upload_screenshot(
    State(state): State<AppState>,
    Json(request): Json<UploadRequest>,
) -> Result<Json<UploadResponse>> {
    if request.user_id.trim().is_empty() {
        return Err(AppError::Validation("Missing userId".to_string()));
    }

    let url = state
        .blobs
        .upload(&request.user_id, &request.image_data_url)
        .await?;
    Ok(Json(UploadResponse { url }))
}
