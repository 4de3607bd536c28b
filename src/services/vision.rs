//! HTTP client for the vision/text-generation endpoint.
//!
//! The analysis path treats the model as an opaque `generate(prompt,
//! image_url) -> text` function behind the [`VisionModel`] trait; any
//! failure here (timeout, rate limit, empty output) routes the request to
//! the deterministic fallback instead of surfacing an error.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{AppError, Result};
use crate::models::ListingInput;

const API_BASE_URL: &str = "https://api.openai.com/v1/responses";

#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn generate(&self, prompt: &str, image_url: &str) -> Result<String>;
}

pub fn build_prompt(input: &ListingInput) -> String {
    format!(
        "Analyze this marketplace listing screenshot and return JSON only.\n\
         Title: {}\n\
         Seller price: {}\n\
         Location: {}\n\
         Listing text: {}\n\n\
         Return fields:\n\
         dealScore (number 0-100), marketValue (number), condition (\"poor\"|\"fair\"|\"good\"|\"excellent\"),\n\
         confidence (\"low\"|\"medium\"|\"high\"), scamFlags (string[]),\n\
         negotiationMessage (string), reasoning (string[]).",
        input.title.as_deref().unwrap_or(""),
        input
            .seller_price
            .map(|p| p.to_string())
            .unwrap_or_default(),
        input.location.as_deref().unwrap_or(""),
        input.image_text.as_deref().unwrap_or(""),
    )
}

#[derive(Debug, Clone)]
pub struct OpenAiVision {
    client: reqwest::Client,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    input: Vec<InputMessage<'a>>,
}

#[derive(Serialize)]
struct InputMessage<'a> {
    role: &'a str,
    content: Vec<InputContent<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum InputContent<'a> {
    #[serde(rename = "input_text")]
    Text { text: &'a str },
    #[serde(rename = "input_image")]
    Image { image_url: &'a str },
}

#[derive(Deserialize)]
struct GenerateResponse {
    output_text: Option<String>,
    output: Option<Vec<OutputItem>>,
}

#[derive(Deserialize)]
struct OutputItem {
    content: Option<Vec<OutputContent>>,
}

#[derive(Deserialize)]
struct OutputContent {
    text: Option<String>,
}

impl OpenAiVision {
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| AppError::ConfigMissing(format!("invalid API key header value: {}", e)))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::UpstreamUnavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(OpenAiVision {
            client,
            model: model.to_string(),
            base_url: API_BASE_URL.to_string(),
        })
    }

    /// Overrides the base URL (for testing with wiremock).
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    fn collect_text(response: GenerateResponse) -> String {
        if let Some(text) = response.output_text {
            if !text.trim().is_empty() {
                return text;
            }
        }
        response
            .output
            .unwrap_or_default()
            .into_iter()
            .flat_map(|item| item.content.unwrap_or_default())
            .filter_map(|c| c.text)
            .collect()
    }
}

#[async_trait]
impl VisionModel for OpenAiVision {
    async fn generate(&self, prompt: &str, image_url: &str) -> Result<String> {
        let request = GenerateRequest {
            model: &self.model,
            input: vec![InputMessage {
                role: "user",
                content: vec![
                    InputContent::Text { text: prompt },
                    InputContent::Image { image_url },
                ],
            }],
        };

        let response = self
            .client
            .post(&self.base_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::UpstreamUnavailable(format!(
                "status {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(format!("invalid response body: {}", e)))?;

        let text = Self::collect_text(parsed);
        debug!(chars = text.len(), "generation endpoint replied");
        if text.trim().is_empty() {
            return Err(AppError::UpstreamUnavailable("empty model output".to_string()));
        }
        Ok(text)
    }
}
