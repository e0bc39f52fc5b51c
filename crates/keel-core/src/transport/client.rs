//! Timeout, retry and classification on top of a raw [`Transport`].

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::{Method, Transport, TransportError, TransportRequest};

/// Deadline applied to every remote call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_MAX_ATTEMPTS: usize = 3;
const DEFAULT_BASE_BACKOFF_MS: u64 = 250;
const DEFAULT_MAX_BACKOFF_MS: u64 = 8_000;

/// Retry schedule for idempotent calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: Duration::from_millis(DEFAULT_BASE_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }
}

/// `base * 2^(attempt-1)` capped at `max`, plus up to 20% jitter.
pub fn backoff_with_jitter(attempt: usize, base: Duration, max: Duration) -> Duration {
    let exp = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX).min(16);
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    let backoff = base_ms.saturating_mul(1_u64 << exp).min(max_ms);
    let jitter = rand::thread_rng().gen_range(0..=(backoff / 5).max(1));
    Duration::from_millis(backoff.saturating_add(jitter))
}

/// Client for the sync authority.
#[derive(Clone)]
pub struct SyncTransportClient {
    transport: Arc<dyn Transport>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl std::fmt::Debug for SyncTransportClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncTransportClient")
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl SyncTransportClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// One attempt with an explicit deadline. Any non-2xx is an error.
    async fn attempt(
        &self,
        request: TransportRequest,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let response = tokio::time::timeout(timeout, self.transport.send(request))
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;
        match TransportError::from_status(response.status, &response.body) {
            Some(error) => Err(error),
            None => Ok(response.body),
        }
    }

    /// Send a request, retrying idempotent methods on network and server
    /// errors with exponential backoff.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, TransportError> {
        let mut request = TransportRequest::new(method, path);
        request.body = body;

        let max_attempts = if method.is_idempotent() {
            self.retry.max_attempts.max(1)
        } else {
            1
        };

        let mut attempt = 1;
        loop {
            match self.attempt(request.clone(), self.timeout).await {
                Ok(body) => return Ok(body),
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    let delay =
                        backoff_with_jitter(attempt, self.retry.base_backoff, self.retry.max_backoff);
                    tracing::debug!(
                        %method,
                        path,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "retrying sync request: {error}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        let body = self.request(Method::Get, path, None).await?;
        serde_json::from_value(body).map_err(|error| TransportError::Decode(error.to_string()))
    }

    pub async fn put_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Value, TransportError> {
        let body = encode(body)?;
        self.request(Method::Put, path, Some(body)).await
    }

    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Value, TransportError> {
        let body = encode(body)?;
        self.request(Method::Post, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, TransportError> {
        self.request(Method::Delete, path, None).await
    }

    /// Single HEAD with a short deadline, used for reachability checks.
    pub async fn probe(&self, path: &str, timeout: Duration) -> Result<(), TransportError> {
        self.attempt(TransportRequest::new(Method::Head, path), timeout)
            .await
            .map(|_| ())
    }
}

fn encode<B: Serialize + ?Sized>(body: &B) -> Result<Value, TransportError> {
    serde_json::to_value(body).map_err(|error| TransportError::Decode(error.to_string()))
}
