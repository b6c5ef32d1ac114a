//! Backoff for rate-limited and temporarily unavailable embedding endpoints.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;

use crate::error::LlmError;

/// How often and how patiently to retry a request that the server pushed back on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Upper bound for any single wait, `Retry-After` included.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// `base_delay * 2^attempt` unless the server asked for something else, capped at `max_delay`.
    #[must_use]
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = || {
            self.base_delay
                .saturating_mul(1_u32.checked_shl(attempt).unwrap_or(u32::MAX))
        };
        retry_after.unwrap_or_else(backoff).min(self.max_delay)
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Send a request, retrying on 429 and 503 responses.
///
/// `send` must build a fresh request on every call. The first response with any other status
/// is returned for the caller to inspect.
///
/// # Errors
///
/// Returns [`LlmError::RateLimited`] once retries are exhausted and [`LlmError::Http`] for
/// transport failures.
pub(crate) async fn send_with_retry<F, Fut>(
    provider: &str,
    policy: &RetryPolicy,
    mut send: F,
) -> Result<reqwest::Response, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut attempt = 0;
    loop {
        let response = send().await?;
        let status = response.status();
        if !is_retryable(status) {
            return Ok(response);
        }
        if attempt >= policy.max_retries {
            tracing::warn!(provider, %status, attempts = attempt + 1, "giving up on embedding endpoint");
            return Err(LlmError::RateLimited);
        }

        let delay = policy.delay(attempt, retry_after(&response));
        tracing::warn!(
            provider,
            %status,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt = attempt + 1,
            "embedding endpoint pushed back, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
