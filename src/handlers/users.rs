use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    errors::{AppError, Result},
    handlers::AppState,
    models::{AnalysisResult, DealRecord, UserProfile},
    store::{NewDeal, ProfileRecord},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub uid: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub display_name: String,
}

/// Creates the profile document on first sign-in; repeat calls are no-ops.
pub async fn create_user(
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserProfile>)> {
    if request.uid.trim().is_empty() {
        return Err(AppError::Validation("Missing uid".to_string()));
    }

    let record = ProfileRecord::new(&request.uid, &request.email, &request.display_name);
    state.profiles.create(&record).await?;

    let profile = state
        .ledger
        .profile(&request.uid)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok((StatusCode::CREATED, Json(profile)))
}

pub async fn get_profile(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<UserProfile>> {
    let profile = state.ledger.profile(&uid).await?.ok_or(AppError::NotFound)?;
    Ok(Json(profile))
}

pub async fn refresh_quota(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<UserProfile>> {
    let profile = state.ledger.refresh(&uid).await?.ok_or(AppError::NotFound)?;
    Ok(Json(profile))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeResponse {
    pub blocked: bool,
    pub profile: UserProfile,
}

pub async fn consume_quota(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<ConsumeResponse>> {
    let decision = state.ledger.consume(&uid).await?;
    let profile = decision.profile.ok_or(AppError::NotFound)?;
    Ok(Json(ConsumeResponse {
        blocked: decision.blocked,
        profile,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveDealRequest {
    pub id: Option<Uuid>,
    pub title: String,
    pub seller_price: Option<f64>,
    pub location: Option<String>,
    pub image_url: Option<String>,
    pub analysis: AnalysisResult,
}

#[derive(Debug, Serialize)]
pub struct SaveDealResponse {
    pub id: Uuid,
}

pub async fn save_deal(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Json(request): Json<SaveDealRequest>,
) -> Result<(StatusCode, Json<SaveDealResponse>)> {
    let deal = NewDeal {
        id: request.id,
        title: request.title,
        seller_price: request.seller_price,
        location: request.location,
        image_url: request.image_url,
        analysis: request.analysis,
    };

    let id = state.deals.save(&uid, &deal).await?;
    Ok((StatusCode::CREATED, Json(SaveDealResponse { id })))
}

#[derive(Debug, Deserialize)]
pub struct ListDealsQuery {
    #[serde(default = "default_take")]
    pub take: i64,
}

fn default_take() -> i64 {
    50
}

pub async fn list_deals(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Query(query): Query<ListDealsQuery>,
) -> Result<Json<Vec<DealRecord>>> {
    let take = query.take.clamp(1, 200);
    let deals = state.deals.list(&uid, take).await?;
    Ok(Json(deals))
}

pub async fn update_deal_analysis(
    State(state): State<AppState>,
    Path((uid, deal_id)): Path<(String, Uuid)>,
    Json(analysis): Json<AnalysisResult>,
) -> Result<StatusCode> {
    let updated = state.deals.update_analysis(&uid, deal_id, &analysis).await?;
    if !updated {
        return Err(AppError::NotFound);
    }
    Ok(StatusCode::NO_CONTENT)
}
