//! Billing provider integration: hosted checkout session creation and
//! signed webhook verification. Unlike the analysis path, nothing here is
//! swallowed; billing failures must be visible to the caller.

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;

use crate::config::Config;
use crate::errors::{AppError, Result};

const API_BASE_URL: &str = "https://api.stripe.com/v1";

/// Accepted clock skew between the signature timestamp and now.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct BillingClient {
    client: reqwest::Client,
    secret_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSession {
    pub url: Option<String>,
}

impl BillingClient {
    pub fn new(secret_key: &str) -> Self {
        BillingClient {
            client: reqwest::Client::new(),
            secret_key: secret_key.to_string(),
            base_url: API_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    pub async fn create_checkout_session(
        &self,
        price_id: &str,
        uid: &str,
        email: Option<&str>,
        success_url: &str,
        cancel_url: &str,
        next_path: &str,
    ) -> Result<CheckoutSession> {
        let mut form: Vec<(&str, String)> = vec![
            ("mode", "subscription".to_string()),
            ("line_items[0][price]", price_id.to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            ("success_url", success_url.to_string()),
            ("cancel_url", cancel_url.to_string()),
            ("client_reference_id", uid.to_string()),
            ("metadata[uid]", uid.to_string()),
            ("metadata[plan]", "pro".to_string()),
            ("metadata[next]", next_path.to_string()),
            ("subscription_data[metadata][uid]", uid.to_string()),
            ("subscription_data[metadata][plan]", "pro".to_string()),
            ("allow_promotion_codes", "true".to_string()),
        ];
        if let Some(email) = email {
            form.push(("customer_email", email.to_string()));
        }

        let response = self
            .client
            .post(format!("{}/checkout/sessions", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::Billing(format!("checkout request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Billing(format!(
                "checkout session rejected ({}): {}",
                status,
                body.chars().take(300).collect::<String>()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Billing(format!("invalid checkout response: {}", e)))
    }
}

/// Verifies a `t=<unix>,v1=<hex>` signature header over `"{t}.{payload}"`
/// with HMAC-SHA256 and a bounded timestamp tolerance.
pub fn verify_signature(payload: &[u8], header: &str, secret: &str, now_unix: i64) -> Result<()> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| AppError::SignatureInvalid("missing timestamp".to_string()))?;
    if candidates.is_empty() {
        return Err(AppError::SignatureInvalid("missing v1 signature".to_string()));
    }
    if (now_unix - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(AppError::SignatureInvalid("timestamp outside tolerance".to_string()));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::SignatureInvalid("invalid signing secret".to_string()))?;
    mac.update(format!("{}.", timestamp).as_bytes());
    mac.update(payload);

    for candidate in candidates {
        let Ok(bytes) = hex::decode(candidate) else {
            continue;
        };
        // verify_slice is constant time.
        if mac.clone().verify_slice(&bytes).is_ok() {
            return Ok(());
        }
    }

    Err(AppError::SignatureInvalid("no matching signature".to_string()))
}

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub object: Value,
}

impl WebhookEvent {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| AppError::Validation(format!("malformed webhook payload: {}", e)))
    }

    /// The user this event refers to: the checkout session's client
    /// reference id, falling back to metadata on either object shape.
    pub fn uid(&self) -> Option<String> {
        let object = &self.data.object;
        object
            .get("client_reference_id")
            .and_then(Value::as_str)
            .or_else(|| {
                object
                    .get("metadata")
                    .and_then(|m| m.get("uid"))
                    .and_then(Value::as_str)
            })
            .map(str::to_string)
    }

    pub fn customer_id(&self) -> Option<String> {
        id_or_object_id(self.data.object.get("customer"))
    }

    pub fn subscription_id(&self) -> Option<String> {
        id_or_object_id(self.data.object.get("subscription"))
    }
}

/// Provider payloads carry references either as a bare id string or as an
/// expanded object with an `id` field.
fn id_or_object_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("id").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Base URL for checkout redirect targets: explicit config override first,
/// then forwarded headers. Loopback hosts are refused in production so a
/// misconfigured deployment cannot hand the provider unreachable URLs.
pub fn resolve_base_url(config: &Config, headers: &HeaderMap) -> Result<String> {
    if let Some(url) = &config.public_base_url {
        return Ok(url.clone());
    }

    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get("host"))
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::ConfigMissing("no base URL configured and no Host header".to_string()))?;

    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("https");

    if config.is_production() && is_loopback_host(host) {
        return Err(AppError::Validation(format!(
            "refusing loopback base URL in production: {}",
            host
        )));
    }

    Ok(format!("{}://{}", proto, host.trim_end_matches('/')))
}

fn is_loopback_host(host: &str) -> bool {
    let bare = host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host);
    bare == "localhost" || bare == "::1" || bare.starts_with("127.")
}

/// Redirect targets must stay inside the app; anything not rooted at `/`
/// collapses to the default.
pub fn safe_next_path(next: Option<&str>) -> &str {
    match next {
        Some(path) if path.starts_with('/') && !path.starts_with("//") => path,
        _ => "/app",
    }
}
