//! HTTP transport for the raved authentication API.
//!
//! `Transport` is the seam the session service talks through; `ApiClient`
//! is the reqwest-backed implementation used by applications. Tests supply
//! their own `Transport` instead of reaching the network.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Initial backoff delay in milliseconds for rate limiting.
/// 1 second is polite to the server while not making users wait too long.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// A request/response channel to the remote API.
///
/// Paths are absolute API paths such as `/api/auth/login`. A successful
/// response with an empty body yields `Value::Null`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(
        &self,
        path: &str,
        body: Option<&Value>,
        bearer: Option<&str>,
    ) -> Result<Value, ApiError>;
}

/// API client for the raved backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    max_rate_limit_retries: u32,
}

impl ApiClient {
    /// Create a new API client from configuration
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            max_rate_limit_retries: config.max_rate_limit_retries,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            // Rate limited - signal to retry
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Parse a success body, treating an empty body as `null`.
    fn parse_body(text: &str) -> Result<Value, ApiError> {
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON response: {}", e)))
    }
}

#[async_trait]
impl Transport for ApiClient {
    async fn post(
        &self,
        path: &str,
        body: Option<&Value>,
        bearer: Option<&str>,
    ) -> Result<Value, ApiError> {
        let url = self.url(path);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut request = self
                .client
                .post(&url)
                .header(header::ACCEPT, "application/json");
            if let Some(token) = bearer {
                request = request.bearer_auth(token);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await.map_err(ApiError::from_send)?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    debug!(path = path, status = %response.status(), "POST succeeded");
                    let text = response.text().await.map_err(ApiError::from_send)?;
                    return Self::parse_body(&text);
                }
                None => {
                    // Rate limited
                    retries += 1;
                    if retries > self.max_rate_limit_retries {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(
                        path = path,
                        retry = retries,
                        backoff_ms = backoff_ms,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }
}
