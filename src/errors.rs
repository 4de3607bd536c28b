use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("No extractable JSON in model output")]
    ParseFailure { raw: String },

    #[error("Generation endpoint unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Generation endpoint rate limited")]
    RateLimited,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Webhook signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("Missing configuration: {0}")]
    ConfigMissing(String),

    #[error("Billing provider error: {0}")]
    Billing(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found")]
    NotFound,

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
            // Analysis-path errors are converted to the deterministic
            // fallback before they reach a handler boundary; these arms
            // only fire if one escapes through a non-analysis route.
            AppError::ParseFailure { .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Model output unparseable".to_string(),
            ),
            AppError::UpstreamUnavailable(ref msg) => {
                tracing::warn!("Upstream unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Generation endpoint unavailable".to_string(),
                )
            }
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "Generation endpoint rate limited".to_string(),
            ),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::SignatureInvalid(msg) => {
                tracing::warn!("Webhook signature rejected: {}", msg);
                (StatusCode::BAD_REQUEST, format!("Invalid signature: {}", msg))
            }
            AppError::ConfigMissing(msg) => {
                tracing::error!("Missing configuration: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Missing configuration: {}", msg),
                )
            }
            AppError::Billing(msg) => {
                tracing::error!("Billing provider error: {}", msg);
                (StatusCode::BAD_GATEWAY, format!("Billing error: {}", msg))
            }
            AppError::Storage(ref msg) => {
                tracing::error!("Storage error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".to_string())
            }
            AppError::NotFound => (StatusCode::NOT_FOUND, "Resource not found".to_string()),
            AppError::Internal(ref e) => {
                tracing::error!("Internal error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
