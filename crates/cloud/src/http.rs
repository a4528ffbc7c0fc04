//! HTTP client wrapper with auth headers and retry logic.

use crate::auth::CloudAuth;
use crate::error::{CloudError, Result};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest body excerpt kept in error messages
const ERROR_BODY_CHARS: usize = 500;

/// HTTP client for posting provider requests.
pub struct HttpClient {
    client: Client,
    max_retries: u32,
    request_timeout: Duration,
    backoff_base: Duration,
}

impl HttpClient {
    /// Create a new HTTP client.
    pub fn new(request_timeout: Duration, max_retries: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CloudError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_retries,
            request_timeout,
            backoff_base: Duration::from_millis(500),
        })
    }

    /// Override the first retry delay (later retries double it).
    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// POST `body` as JSON and return the raw response bytes.
    ///
    /// Timeouts, connection failures, 5xx and 429 are retried with
    /// exponential backoff. Other 4xx responses fail immediately.
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        auth: &dyn CloudAuth,
    ) -> Result<Vec<u8>> {
        let mut auth_headers = Vec::new();
        auth.sign_request(url, "POST", &mut auth_headers)?;

        let mut req = self
            .client
            .post(url)
            .header("Accept", "application/octet-stream")
            .json(body);
        for (key, value) in &auth_headers {
            req = req.header(key.as_str(), value.as_str());
        }

        self.execute_with_retry(req).await
    }

    /// Execute a request with exponential backoff retry.
    async fn execute_with_retry(&self, request: reqwest::RequestBuilder) -> Result<Vec<u8>> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff_base * 2u32.pow(attempt - 1);
                debug!(attempt, ?delay, "retrying provider request");
                tokio::time::sleep(delay).await;
            }

            let cloned = request
                .try_clone()
                .ok_or_else(|| CloudError::Network("request body cannot be retried".into()))?;

            match cloned.send().await {
                Ok(resp) if resp.status().is_success() => {
                    let bytes = resp.bytes().await?;
                    return Ok(bytes.to_vec());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    let err = CloudError::Status {
                        status: status.as_u16(),
                        body: body.chars().take(ERROR_BODY_CHARS).collect(),
                    };
                    if !is_retryable_status(status) {
                        return Err(err);
                    }
                    warn!(%status, attempt, "provider request failed");
                    last_err = Some(err);
                }
                Err(e) if e.is_timeout() => {
                    warn!(attempt, "provider request timed out");
                    last_err = Some(CloudError::Timeout(self.request_timeout));
                }
                Err(e) if e.is_connect() => {
                    warn!(attempt, error = %e, "cannot reach provider");
                    last_err = Some(CloudError::Http(e));
                }
                Err(e) => return Err(CloudError::Http(e)),
            }
        }

        Err(last_err.unwrap_or_else(|| CloudError::Network("provider request failed".into())))
    }

    /// Getter for the timeout duration.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}
