use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::{
    errors::{AppError, Result},
    handlers::AppState,
    services::billing::{resolve_base_url, safe_next_path, verify_signature, WebhookEvent},
    store::PlanUpgrade,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub price_id: Option<String>,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub next_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub url: String,
}

pub async fn create_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>> {
    let billing = state
        .billing
        .as_ref()
        .ok_or_else(|| AppError::ConfigMissing("STRIPE_SECRET_KEY".to_string()))?;

    let price_id = request
        .price_id
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::Validation("Missing priceId".to_string()))?;
    let user_id = request
        .user_id
        .as_deref()
        .filter(|u| !u.is_empty())
        .ok_or_else(|| AppError::Validation("Missing userId".to_string()))?;

    let base_url = resolve_base_url(&state.config, &headers)?;
    let next = safe_next_path(request.next_path.as_deref());
    let encoded_next = utf8_percent_encode(next, NON_ALPHANUMERIC).to_string();
    let success_url = format!("{}/purchase/success?next={}", base_url, encoded_next);
    let cancel_url = format!("{}/purchase?next={}", base_url, encoded_next);

    let session = billing
        .create_checkout_session(
            price_id,
            user_id,
            request.email.as_deref(),
            &success_url,
            &cancel_url,
            next,
        )
        .await?;

    let url = session
        .url
        .ok_or_else(|| AppError::Billing("checkout session has no redirect URL".to_string()))?;

    info!(user_id = %user_id, "created checkout session");
    Ok(Json(CheckoutResponse { url }))
}

/// Signed billing webhook. Unlike analysis, failures here surface as
/// non-200: silent billing failures are unacceptable.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>> {
    let secret = state
        .config
        .stripe_webhook_secret
        .as_deref()
        .ok_or_else(|| AppError::Validation("billing webhook not configured".to_string()))?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::SignatureInvalid("missing stripe-signature header".to_string()))?;

    verify_signature(&body, signature, secret, Utc::now().timestamp())?;

    let event = WebhookEvent::parse(&body)?;
    let first_purchase = event.kind == "checkout.session.completed";
    let recurring = event.kind == "invoice.payment_succeeded";

    if first_purchase || recurring {
        if let Some(uid) = event.uid() {
            let upgrade = PlanUpgrade {
                reset_usage: first_purchase,
                day: Utc::now().date_naive(),
                uploads_limit: state.config.pro_daily_limit,
                stripe_customer_id: event.customer_id(),
                stripe_subscription_id: event.subscription_id(),
            };
            // The event id commits with the upgrade: a failed upgrade
            // surfaces as 5xx and the redelivery retries it, while a
            // redelivered success is acknowledged without reapplying.
            if state.profiles.apply_upgrade(&event.id, &uid, &upgrade).await? {
                info!(uid = %uid, event = %event.kind, "applied plan upgrade");
            } else {
                info!(event_id = %event.id, "skipping redelivered billing event");
            }
        }
    }

    Ok(Json(json!({ "received": true })))
}
