use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::{
    config::Config,
    ledger::QuotaLedger,
    services::{billing::BillingClient, vision::VisionModel},
    storage::BlobStore,
    store::{DealStore, ProfileStore},
};

pub mod analyze;
pub mod billing;
pub mod health;
pub mod uploads;
pub mod users;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub profiles: Arc<dyn ProfileStore>,
    pub deals: Arc<dyn DealStore>,
    pub ledger: QuotaLedger,
    pub vision: Option<Arc<dyn VisionModel>>,
    pub blobs: Arc<dyn BlobStore>,
    pub billing: Option<BillingClient>,
}

pub fn router(state: AppState) -> Router {
    let uploads_dir = state.config.upload_dir.clone();

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/analyze", post(analyze::analyze))
        .route("/api/billing/checkout", post(billing::create_checkout))
        .route("/api/billing/webhook", post(billing::webhook))
        .route("/api/uploads", post(uploads::upload_screenshot))
        .route("/api/users", post(users::create_user))
        .route("/api/users/:uid/profile", get(users::get_profile))
        .route("/api/users/:uid/quota/refresh", post(users::refresh_quota))
        .route("/api/users/:uid/quota/consume", post(users::consume_quota))
        .route("/api/users/:uid/deals", post(users::save_deal).get(users::list_deals))
        .route("/api/users/:uid/deals/:deal_id/analysis", put(users::update_deal_analysis))
        .nest_service("/uploads", ServeDir::new(uploads_dir))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
