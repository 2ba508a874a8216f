//! Shared JSON-over-HTTP request loop for the embedding and chat backends.
//!
//! Every call is classified into a [`ServiceError`]:
//! - connection failures and timeouts → [`ServiceError::Network`] (retried)
//! - HTTP 429 and 5xx → [`ServiceError::Status`] (retried)
//! - other non-2xx → [`ServiceError::Status`] (fails immediately)
//! - 2xx with a body that is not JSON → [`ServiceError::Malformed`]
//!
//! Backoff doubles from `base_delay` on each retry and is capped at
//! `max_delay`.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ServiceError;

/// Retry bound and exponential backoff shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32 << (attempt - 1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, 1000, 32_000)
    }
}

/// Build a client with a whole-request timeout.
pub fn build_client(timeout_secs: u64) -> Result<reqwest::Client, ServiceError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ServiceError::network("http", e.to_string()))
}

/// POST `body` as JSON to `url` and return the parsed JSON response,
/// retrying transient failures according to `policy`.
pub async fn post_json(
    client: &reqwest::Client,
    service: &str,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
    policy: &RetryPolicy,
) -> Result<Value, ServiceError> {
    let mut last_err = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let delay = policy.delay_for(attempt);
            debug!(service, attempt, ?delay, "retrying request");
            tokio::time::sleep(delay).await;
        }

        match send_once(client, service, url, bearer, body).await {
            Ok(json) => return Ok(json),
            Err(e) if e.is_transient() => {
                warn!(service, attempt, error = %e, "transient failure");
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| ServiceError::network(service, "no attempts were made")))
}

async fn send_once(
    client: &reqwest::Client,
    service: &str,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
) -> Result<Value, ServiceError> {
    let mut request = client
        .post(url)
        .header("Content-Type", "application/json")
        .json(body);
    if let Some(key) = bearer {
        request = request.header("Authorization", format!("Bearer {}", key));
    }

    let response = request
        .send()
        .await
        .map_err(|e| ServiceError::network(service, e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        return Err(ServiceError::status(service, status.as_u16(), body_text));
    }

    let text = response
        .text()
        .await
        .map_err(|e| ServiceError::network(service, e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| ServiceError::malformed(service, e.to_string()))
}
