use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dealai_server::{
    config::Config,
    handlers::{self, AppState},
    ledger::{PlanLimits, QuotaLedger},
    services::{billing::BillingClient, vision::{OpenAiVision, VisionModel}},
    storage::{create_blob_store, BlobStore},
    store::{Database, ProfileStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dealai_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let database = Database::new(&config.database_url).await?;
    database.migrate().await?;
    info!("Connected to database");

    let profiles: Arc<dyn ProfileStore> = Arc::new(database.profiles());
    let deals = Arc::new(database.deals());
    let blobs: Arc<dyn BlobStore> = Arc::from(create_blob_store(&config)?);

    let limits = PlanLimits {
        free: config.free_daily_limit,
        pro: config.pro_daily_limit,
    };
    let ledger = QuotaLedger::new(profiles.clone(), limits);

    let vision: Option<Arc<dyn VisionModel>> = match &config.openai_api_key {
        Some(key) => {
            let client = OpenAiVision::new(
                key,
                &config.openai_model,
                Duration::from_secs(config.openai_timeout_secs),
            )?;
            Some(Arc::new(client))
        }
        None => {
            warn!("OPENAI_API_KEY not set; all analyses will use the deterministic fallback");
            None
        }
    };

    let billing = config.stripe_secret_key.as_deref().map(BillingClient::new);
    if billing.is_none() {
        warn!("STRIPE_SECRET_KEY not set; checkout endpoint disabled");
    }

    let state = AppState {
        config: config.clone(),
        profiles,
        deals,
        ledger,
        vision,
        blobs,
        billing,
    };

    let app = handlers::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
