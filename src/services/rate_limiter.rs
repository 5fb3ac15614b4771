//! Rate limiting and retry logic for gateway calls
//!
//! Keeps the bridge within the platform's flood limits and recovers from
//! transient failures with a bounded, iterative retry loop.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::Client;
use tracing::{debug, warn};

use super::telegram::FetchError;

/// Configuration for rate limiting
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per second
    pub requests_per_second: u32,
    /// Burst capacity (allows short bursts above the rate)
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 2,
            burst_size: 5,
        }
    }
}

/// A rate-limited HTTP client wrapper
pub struct RateLimitedClient {
    client: Client,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    name: String,
}

impl RateLimitedClient {
    /// Create a new rate-limited client
    pub fn new(name: &str, config: RateLimitConfig) -> Self {
        let quota = Quota::per_second(
            NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN),
        )
        .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN));

        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
            limiter: Arc::new(RateLimiter::direct(quota)),
            name: name.to_string(),
        }
    }

    /// Get a reference to the underlying client for building requests
    /// (caller is responsible for calling wait_for_permit first)
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Wait for a rate limit permit
    pub async fn wait_for_permit(&self) {
        self.limiter.until_ready().await;
        debug!(client = %self.name, "Rate limit permit acquired");
    }
}

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Initial backoff duration
    pub initial_interval: Duration,
    /// Maximum backoff duration
    pub max_interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    fn to_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Execute a gateway call with a bounded retry loop.
///
/// Rate-limit signals honor the server-supplied wait; other transient
/// errors back off exponentially. Permanent errors are returned on the
/// first occurrence, never retried.
pub async fn retry_fetch<T, Fut, F>(
    operation: F,
    config: &RetryConfig,
    operation_name: &str,
) -> Result<T, FetchError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, FetchError>>,
{
    let mut attempts = 0;
    let mut backoff = config.to_backoff();

    loop {
        attempts += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() || attempts >= config.max_attempts => {
                if e.is_retryable() {
                    warn!(
                        operation = %operation_name,
                        attempts = attempts,
                        error = %e,
                        "Operation failed after max attempts"
                    );
                }
                return Err(e);
            }
            Err(FetchError::RateLimited { retry_after }) => {
                warn!(
                    operation = %operation_name,
                    attempt = attempts,
                    retry_after = retry_after,
                    "Rate limited, waiting"
                );
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
            }
            Err(e) => {
                let duration = backoff
                    .next_backoff()
                    .unwrap_or(config.max_interval);
                warn!(
                    operation = %operation_name,
                    attempt = attempts,
                    error = %e,
                    retry_in_ms = duration.as_millis() as u64,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(duration).await;
            }
        }
    }
}
