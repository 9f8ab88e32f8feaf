//! Rate-limited HTTP client for the archive.
//!
//! Wraps reqwest with the per-host token bucket and the retry policy the
//! archive needs: 429 and 5xx retry with exponential backoff and jitter,
//! any other 4xx surfaces as a non-retryable error.

use std::time::Duration;

use rand::Rng;
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, warn};

use super::rate_limit::RateLimiter;
use crate::errors::{AcquireError, Result};

const USER_AGENT: &str = concat!("newsacquire/", env!("CARGO_PKG_VERSION"));

/// Initial backoff before the first retry.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// HTTP client with rate limiting and retry.
#[derive(Clone)]
pub struct ArchiveHttpClient {
    client: Client,
    limiter: RateLimiter,
    max_attempts: u32,
}

impl ArchiveHttpClient {
    /// Create a client with the given per-host rate and retry attempts.
    pub fn new(rate_per_second: f64, max_attempts: u32, timeout: Duration) -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .gzip(true)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            client,
            limiter: RateLimiter::new(rate_per_second),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// GET with retries. Returns the response once a non-retryable status
    /// arrives; 4xx other than 429 become `PermanentUpstream`, 404 becomes
    /// `NotFound`.
    pub async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<Response> {
        self.request(reqwest::Method::GET, url, query).await
    }

    /// HEAD existence probe: true on 2xx, false on 404/403.
    pub async fn head_exists(&self, url: &str) -> Result<bool> {
        let response = self.request(reqwest::Method::HEAD, url, &[]).await;
        match response {
            Ok(r) => Ok(r.status().is_success()),
            Err(AcquireError::NotFound { .. }) => Ok(false),
            Err(AcquireError::PermanentUpstream(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<serde_json::Value> {
        let response = self.get(url, query).await?;
        response
            .json()
            .await
            .map_err(|e| AcquireError::CorruptData(format!("invalid JSON from {url}: {e}")))
    }

    pub async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.get(url, &[]).await?;
        response
            .text()
            .await
            .map_err(|e| AcquireError::transient(format!("read body from {url}: {e}")))
    }

    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.get(url, &[]).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AcquireError::transient(format!("read body from {url}: {e}")))?;
        Ok(bytes.to_vec())
    }

    async fn request(
        &self,
        method: reqwest::Method,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Response> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let host = self.limiter.acquire(url).await;

            debug!(%url, attempt, "archive request");
            let outcome = self
                .client
                .request(method.clone(), url)
                .query(query)
                .send()
                .await;

            let retry_delay = match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() || status.is_redirection() {
                        if let Some(host) = &host {
                            self.limiter.report_success(host).await;
                        }
                        return Ok(response);
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS
                        || status == StatusCode::SERVICE_UNAVAILABLE
                    {
                        let retry_after = parse_retry_after(&response);
                        if let Some(host) = &host {
                            self.limiter.report_rate_limited(host, retry_after).await;
                        }
                        if attempt >= self.max_attempts {
                            return Err(AcquireError::PermanentUpstream(format!(
                                "{url}: HTTP {status} after {attempt} attempts"
                            )));
                        }
                        Some(retry_after.unwrap_or_else(|| self.backoff(attempt)))
                    } else if status.is_server_error() {
                        if attempt >= self.max_attempts {
                            return Err(AcquireError::PermanentUpstream(format!(
                                "{url}: HTTP {status} after {attempt} attempts"
                            )));
                        }
                        Some(self.backoff(attempt))
                    } else if status == StatusCode::NOT_FOUND {
                        return Err(AcquireError::not_found("archive resource", url));
                    } else {
                        // Any other 4xx is not retryable.
                        return Err(AcquireError::PermanentUpstream(format!(
                            "{url}: HTTP {status}"
                        )));
                    }
                }
                Err(e) => {
                    if attempt >= self.max_attempts {
                        return Err(AcquireError::PermanentUpstream(format!(
                            "{url}: {e} after {attempt} attempts"
                        )));
                    }
                    Some(self.backoff(attempt))
                }
            };

            if let Some(delay) = retry_delay {
                warn!(%url, attempt, ?delay, "retrying archive request");
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// Exponential backoff with +/-25% jitter: 1s, 2s, 4s, ...
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(10);
        let base = INITIAL_BACKOFF.as_secs_f64() * f64::from(1u32 << exp);
        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        Duration::from_secs_f64(base * jitter)
    }
}

/// Retry-After in seconds; HTTP-date form is rare enough here to ignore.
fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_with_jitter_bounds() {
        let client = ArchiveHttpClient::new(2.0, 5, Duration::from_secs(60));
        for attempt in 1..=4u32 {
            let base = f64::from(1u32 << (attempt - 1));
            let d = client.backoff(attempt).as_secs_f64();
            assert!(d >= base * 0.75 - f64::EPSILON, "attempt {attempt}: {d}");
            assert!(d <= base * 1.25 + f64::EPSILON, "attempt {attempt}: {d}");
        }
    }
}
