use anyhow::Result;
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub environment: Environment,
    pub upload_dir: String,
    pub public_base_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_timeout_secs: u64,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub free_daily_limit: i64,
    pub pro_daily_limit: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let environment = match env::var("ENVIRONMENT").as_deref() {
            Ok("production") => Environment::Production,
            _ => Environment::Development,
        };

        Ok(Config {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/dealai".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            environment,
            upload_dir: env::var("UPLOAD_DIR").unwrap_or_else(|_| "./uploads".to_string()),
            public_base_url: env::var("PUBLIC_BASE_URL")
                .ok()
                .map(|u| u.trim_end_matches('/').to_string()),
            openai_api_key: env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            openai_model: env::var("OPENAI_MODEL")
                .unwrap_or_else(|_| "gpt-4.1-mini".to_string()),
            openai_timeout_secs: env::var("OPENAI_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            stripe_secret_key: env::var("STRIPE_SECRET_KEY").ok().filter(|k| !k.is_empty()),
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET")
                .ok()
                .filter(|k| !k.is_empty()),
            free_daily_limit: env::var("FREE_DAILY_LIMIT")
                .unwrap_or_else(|_| "3".to_string())
                .parse()?,
            pro_daily_limit: env::var("PRO_DAILY_LIMIT")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()?,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}
