use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{NaiveDate, Utc};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dealai_server::config::{Config, Environment};
use dealai_server::errors::{AppError, Result as AppResult};
use dealai_server::handlers::{router, AppState};
use dealai_server::ledger::{LedgerOutcome, PlanLimits, QuotaLedger};
use dealai_server::models::{Plan, FREE_LIMIT};
use dealai_server::services::billing::BillingClient;
use dealai_server::services::vision::VisionModel;
use dealai_server::storage::LocalBlobStore;
use dealai_server::store::{LedgerOp, MemoryStore, PlanUpgrade, ProfileRecord, ProfileStore};

const WEBHOOK_SECRET: &str = "whsec_test";

enum Script {
    Text(&'static str),
    RateLimited,
    Unavailable,
}

struct ScriptedVision(Script);

#[async_trait]
impl VisionModel for ScriptedVision {
    async fn generate(&self, _prompt: &str, _image_url: &str) -> AppResult<String> {
        match &self.0 {
            Script::Text(text) => Ok(text.to_string()),
            Script::RateLimited => Err(AppError::RateLimited),
            Script::Unavailable => Err(AppError::UpstreamUnavailable("boom".to_string())),
        }
    }
}

struct TestApp {
    app: Router,
    store: Arc<MemoryStore>,
    _uploads: TempDir,
}

fn test_config(uploads: &TempDir) -> Config {
    Config {
        database_url: String::new(),
        port: 0,
        environment: Environment::Development,
        upload_dir: uploads.path().to_string_lossy().to_string(),
        public_base_url: Some("https://dealai.example".to_string()),
        openai_api_key: None,
        openai_model: "gpt-4.1-mini".to_string(),
        openai_timeout_secs: 5,
        stripe_secret_key: None,
        stripe_webhook_secret: Some(WEBHOOK_SECRET.to_string()),
        free_daily_limit: FREE_LIMIT,
        pro_daily_limit: 10_000,
    }
}

fn build_app(vision: Option<Arc<dyn VisionModel>>, billing: Option<BillingClient>) -> TestApp {
    let uploads = TempDir::new().unwrap();
    let config = test_config(&uploads);
    let store = Arc::new(MemoryStore::new());

    let limits = PlanLimits {
        free: config.free_daily_limit,
        pro: config.pro_daily_limit,
    };

    let state = AppState {
        config,
        profiles: store.clone(),
        deals: store.clone(),
        ledger: QuotaLedger::new(store.clone(), limits),
        vision,
        blobs: Arc::new(LocalBlobStore::new(uploads.path()).unwrap()),
        billing,
    };

    TestApp {
        app: router(state),
        store,
        _uploads: uploads,
    }
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn analyze_body() -> Value {
    json!({
        "title": "Chair",
        "sellerPrice": 100.0,
        "location": "",
        "imageUrl": "https://img.example/listing.jpg",
        "imageText": ""
    })
}

#[tokio::test]
async fn analyze_without_model_serves_the_fallback() {
    let test = build_app(None, None);

    let (status, body) = send(&test.app, json_request("POST", "/api/analyze", analyze_body())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dealScore"], 80);
    assert_eq!(body["marketValue"], 500.0);
    assert_eq!(
        body["scamFlags"],
        json!([
            "Location not provided",
            "Limited listing details available",
            "Suspiciously low price"
        ])
    );
    assert_eq!(body["confidence"], "medium");
    assert_eq!(body["condition"], "good");
}

#[tokio::test]
async fn analyze_requires_image_url() {
    let test = build_app(None, None);
    let (status, _) = send(
        &test.app,
        json_request("POST", "/api/analyze", json!({"title": "Chair"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn analyze_merges_model_output_over_the_fallback() {
    let vision: Arc<dyn VisionModel> = Arc::new(ScriptedVision(Script::Text(
        "Sure! Here's the result: {\"dealScore\": 72, \"marketValue\": 900} Thanks!",
    )));
    let test = build_app(Some(vision), None);

    let (status, body) = send(&test.app, json_request("POST", "/api/analyze", analyze_body())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dealScore"], 72);
    assert_eq!(body["marketValue"], 900.0);
    // Fields the model omitted come from the fallback.
    assert_eq!(body["title"], "Chair");
    assert_eq!(body["condition"], "good");
}

#[tokio::test]
async fn analyze_survives_unparseable_model_output() {
    let vision: Arc<dyn VisionModel> = Arc::new(ScriptedVision(Script::Text("not json at all")));
    let test = build_app(Some(vision), None);

    let (status, body) = send(&test.app, json_request("POST", "/api/analyze", analyze_body())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dealScore"], 80);
}

#[tokio::test]
async fn analyze_survives_upstream_failure() {
    let vision: Arc<dyn VisionModel> = Arc::new(ScriptedVision(Script::Unavailable));
    let test = build_app(Some(vision), None);

    let (status, body) = send(&test.app, json_request("POST", "/api/analyze", analyze_body())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dealScore"], 80);
}

#[tokio::test]
async fn analyze_notes_rate_limiting_in_reasoning() {
    let vision: Arc<dyn VisionModel> = Arc::new(ScriptedVision(Script::RateLimited));
    let test = build_app(Some(vision), None);

    let (status, body) = send(&test.app, json_request("POST", "/api/analyze", analyze_body())).await;
    assert_eq!(status, StatusCode::OK);
    let reasoning = body["reasoning"].as_array().unwrap();
    assert!(reasoning
        .iter()
        .any(|r| r.as_str().unwrap().contains("rate limited")));
}

#[tokio::test]
async fn quota_consume_blocks_after_free_ceiling() {
    let test = build_app(None, None);

    let (status, _) = send(
        &test.app,
        json_request("POST", "/api/users", json!({"uid": "u1", "email": "u1@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    for n in 1..=FREE_LIMIT {
        let (status, body) = send(
            &test.app,
            json_request("POST", "/api/users/u1/quota/consume", json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["blocked"], false);
        assert_eq!(body["profile"]["quota"]["uploadsUsed"], n);
    }

    let (status, body) = send(
        &test.app,
        json_request("POST", "/api/users/u1/quota/consume", json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["blocked"], true);
    assert_eq!(body["profile"]["quota"]["uploadsUsed"], FREE_LIMIT);
}

#[tokio::test]
async fn unknown_profile_is_404() {
    let test = build_app(None, None);
    let (status, _) = send(
        &test.app,
        Request::builder()
            .uri("/api/users/ghost/profile")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

fn checkout_event(uid: &str) -> Value {
    json!({
        "id": "evt_1",
        "type": "checkout.session.completed",
        "data": {"object": {
            "client_reference_id": uid,
            "customer": "cus_1",
            "subscription": "sub_1"
        }}
    })
}

fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{}.", timestamp).as_bytes());
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

async fn deliver_webhook(app: &Router, payload: &Value) -> (StatusCode, Value) {
    let body = payload.to_string();
    let signature = sign_payload(body.as_bytes(), WEBHOOK_SECRET, Utc::now().timestamp());
    let request = Request::builder()
        .method("POST")
        .uri("/api/billing/webhook")
        .header("stripe-signature", signature)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap();
    send(app, request).await
}

#[tokio::test]
async fn webhook_upgrades_plan_and_redelivery_is_idempotent() {
    let test = build_app(None, None);
    send(
        &test.app,
        json_request("POST", "/api/users", json!({"uid": "u1"})),
    )
    .await;

    let event = checkout_event("u1");
    let (status, body) = deliver_webhook(&test.app, &event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);

    let first = test.store.fetch("u1").await.unwrap().unwrap();

    // Redelivery of the same event id leaves the profile unchanged.
    let (status, _) = deliver_webhook(&test.app, &event).await;
    assert_eq!(status, StatusCode::OK);
    let second = test.store.fetch("u1").await.unwrap().unwrap();
    assert_eq!(first, second);

    let (_, profile) = send(
        &test.app,
        Request::builder()
            .uri("/api/users/u1/profile")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(profile["plan"], "pro");
    assert_eq!(profile["isPro"], true);
    assert_eq!(profile["quota"]["uploadsLimit"], 10_000);
}

/// Profile store whose first upgrade attempt fails, as a brief database
/// outage would.
struct FlakyProfiles {
    inner: Arc<MemoryStore>,
    tripped: AtomicBool,
}

#[async_trait]
impl ProfileStore for FlakyProfiles {
    async fn fetch(&self, uid: &str) -> AppResult<Option<ProfileRecord>> {
        self.inner.fetch(uid).await
    }

    async fn create(&self, record: &ProfileRecord) -> AppResult<()> {
        self.inner.create(record).await
    }

    async fn transact(
        &self,
        uid: &str,
        op: LedgerOp,
        today: NaiveDate,
        limits: PlanLimits,
    ) -> AppResult<Option<LedgerOutcome>> {
        self.inner.transact(uid, op, today, limits).await
    }

    async fn apply_upgrade(
        &self,
        event_id: &str,
        uid: &str,
        upgrade: &PlanUpgrade,
    ) -> AppResult<bool> {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(AppError::Storage("database briefly unavailable".to_string()));
        }
        self.inner.apply_upgrade(event_id, uid, upgrade).await
    }
}

#[tokio::test]
async fn webhook_redelivery_recovers_from_transient_upgrade_failure() {
    let uploads = TempDir::new().unwrap();
    let config = test_config(&uploads);
    let inner = Arc::new(MemoryStore::new());
    inner
        .put_profile(ProfileRecord::new("u1", "u1@example.com", "U One"))
        .await;

    let profiles = Arc::new(FlakyProfiles {
        inner: inner.clone(),
        tripped: AtomicBool::new(false),
    });
    let limits = PlanLimits {
        free: config.free_daily_limit,
        pro: config.pro_daily_limit,
    };
    let state = AppState {
        config,
        profiles: profiles.clone(),
        deals: inner.clone(),
        ledger: QuotaLedger::new(profiles.clone(), limits),
        vision: None,
        blobs: Arc::new(LocalBlobStore::new(uploads.path()).unwrap()),
        billing: None,
    };
    let app = router(state);

    let event = checkout_event("u1");

    // The failed delivery must not be acknowledged as processed.
    let (status, _) = deliver_webhook(&app, &event).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let record = inner.fetch("u1").await.unwrap().unwrap();
    assert!(!record.is_pro);

    // The provider redelivers and the upgrade lands.
    let (status, body) = deliver_webhook(&app, &event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);

    let record = inner.fetch("u1").await.unwrap().unwrap();
    assert_eq!(record.plan, Some(Plan::Pro));
    assert!(record.is_pro);
}

#[tokio::test]
async fn webhook_rejects_bad_signature() {
    let test = build_app(None, None);
    let body = checkout_event("u1").to_string();
    let request = Request::builder()
        .method("POST")
        .uri("/api/billing/webhook")
        .header("stripe-signature", "t=0,v1=deadbeef")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap();
    let (status, _) = send(&test.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn checkout_without_provider_key_is_a_server_error() {
    let test = build_app(None, None);
    let (status, _) = send(
        &test.app,
        json_request(
            "POST",
            "/api/billing/checkout",
            json!({"priceId": "price_1", "userId": "u1"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn checkout_returns_provider_redirect_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        // The redirect targets embed the next path percent-encoded, then the
        // form encoding escapes it again.
        .and(body_string_contains("next%3D%252Fapp%252Fupload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_test_1",
            "url": "https://checkout.stripe.example/cs_test_1"
        })))
        .mount(&server)
        .await;

    let billing = BillingClient::new("sk_test").with_base_url(format!("{}/v1", server.uri()));
    let test = build_app(None, Some(billing));

    let (status, body) = send(
        &test.app,
        json_request(
            "POST",
            "/api/billing/checkout",
            json!({"priceId": "price_1", "userId": "u1", "nextPath": "/app/upload"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["url"], "https://checkout.stripe.example/cs_test_1");
}

#[tokio::test]
async fn deals_round_trip_and_reanalysis() {
    let test = build_app(None, None);
    send(
        &test.app,
        json_request("POST", "/api/users", json!({"uid": "u1"})),
    )
    .await;

    let analysis = json!({
        "title": "Chair",
        "sellerPrice": 100.0,
        "marketValue": 500.0,
        "dealScore": 80,
        "confidence": "medium",
        "condition": "good",
        "scamFlags": [],
        "negotiationMessage": "Hello",
        "reasoning": []
    });

    let (status, body) = send(
        &test.app,
        json_request(
            "POST",
            "/api/users/u1/deals",
            json!({"title": "Chair", "sellerPrice": 100.0, "analysis": analysis}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let deal_id = body["id"].as_str().unwrap().to_string();

    let (status, deals) = send(
        &test.app,
        Request::builder()
            .uri("/api/users/u1/deals?take=10")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deals.as_array().unwrap().len(), 1);
    assert_eq!(deals[0]["title"], "Chair");

    let mut updated = analysis.clone();
    updated["dealScore"] = json!(55);
    let (status, _) = send(
        &test.app,
        json_request(
            "PUT",
            &format!("/api/users/u1/deals/{}/analysis", deal_id),
            updated,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, deals) = send(
        &test.app,
        Request::builder()
            .uri("/api/users/u1/deals")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(deals[0]["analysis"]["dealScore"], 55);
}

#[tokio::test]
async fn upload_accepts_data_url_and_serves_a_path() {
    let test = build_app(None, None);
    let pixel = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8z8BQDwAEhQGAhKmMIQAAAABJRU5ErkJggg==";

    let (status, body) = send(
        &test.app,
        json_request(
            "POST",
            "/api/uploads",
            json!({"userId": "u1", "imageDataUrl": pixel}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let url = body["url"].as_str().unwrap();
    assert!(url.starts_with("/uploads/users/u1/deals/"));
}

#[tokio::test]
async fn health_check_is_ok() {
    let test = build_app(None, None);
    let (status, body) = send(
        &test.app,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
