//! Per-host token-bucket rate limiter.
//!
//! Each host gets a bucket refilled at `rate` tokens per second; a request
//! takes one token or waits. Burst capacity is a single token, so no more
//! than `rate` requests begin within any one-second window. A reported rate
//! limit (429/503) puts the host into a penalty window that pauses requests
//! entirely, honoring Retry-After when the server sent one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

/// Single-token burst keeps request starts evenly spaced.
const BURST_CAPACITY: f64 = 1.0;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    penalty_until: Option<Instant>,
    total_requests: u64,
    rate_limit_hits: u64,
}

impl Bucket {
    fn new() -> Self {
        Self {
            tokens: BURST_CAPACITY,
            last_refill: Instant::now(),
            penalty_until: None,
            total_requests: 0,
            rate_limit_hits: 0,
        }
    }

    fn refill(&mut self, rate: f64, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(BURST_CAPACITY);
        self.last_refill = now;
    }

    /// Take a token, or return how long to wait before trying again.
    fn try_take(&mut self, rate: f64, now: Instant) -> Option<Duration> {
        if let Some(until) = self.penalty_until {
            if now < until {
                return Some(until - now);
            }
            self.penalty_until = None;
        }
        self.refill(rate, now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            self.total_requests += 1;
            None
        } else {
            Some(Duration::from_secs_f64((1.0 - self.tokens) / rate))
        }
    }
}

/// Statistics for one host.
#[derive(Debug, Clone)]
pub struct HostStats {
    pub total_requests: u64,
    pub rate_limit_hits: u64,
    pub in_penalty: bool,
}

/// The limiter. Cloning shares the underlying buckets.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// Sustained requests per second per host.
    rate: f64,
    buckets: Arc<RwLock<HashMap<String, Bucket>>>,
}

impl RateLimiter {
    pub fn new(rate_per_second: f64) -> Self {
        Self {
            rate: rate_per_second.max(0.01),
            buckets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Extract the host key from a URL.
    pub fn host_of(url: &str) -> Option<String> {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
    }

    /// Wait until the host is ready, then consume a token.
    ///
    /// Returns the host so callers can report the response outcome.
    pub async fn acquire(&self, url: &str) -> Option<String> {
        let host = Self::host_of(url)?;
        loop {
            let wait = {
                let mut buckets = self.buckets.write().await;
                let bucket = buckets.entry(host.clone()).or_insert_with(Bucket::new);
                bucket.try_take(self.rate, Instant::now())
            };
            match wait {
                None => return Some(host),
                Some(wait) => {
                    debug!(host = %host, ?wait, "rate limited locally, waiting");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Report an upstream rate limit; pause the host for `retry_after` or a
    /// default penalty.
    pub async fn report_rate_limited(&self, host: &str, retry_after: Option<Duration>) {
        let penalty = retry_after.unwrap_or(Duration::from_secs(5));
        let mut buckets = self.buckets.write().await;
        let bucket = buckets.entry(host.to_string()).or_insert_with(Bucket::new);
        bucket.rate_limit_hits += 1;
        bucket.tokens = 0.0;
        bucket.penalty_until = Some(Instant::now() + penalty);
        warn!(host, ?penalty, "upstream rate limit, backing off");
    }

    /// Report a success; ends any penalty window early refill-wise.
    pub async fn report_success(&self, host: &str) {
        let mut buckets = self.buckets.write().await;
        if let Some(bucket) = buckets.get_mut(host) {
            bucket.penalty_until = None;
        }
    }

    pub async fn stats(&self) -> HashMap<String, HostStats> {
        let now = Instant::now();
        let buckets = self.buckets.read().await;
        buckets
            .iter()
            .map(|(host, b)| {
                (
                    host.clone(),
                    HostStats {
                        total_requests: b.total_requests,
                        rate_limit_hits: b.rate_limit_hits,
                        in_penalty: b.penalty_until.is_some_and(|u| now < u),
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_of() {
        assert_eq!(
            RateLimiter::host_of("https://chroniclingamerica.loc.gov/lccn/sn83045604.json"),
            Some("chroniclingamerica.loc.gov".to_string())
        );
        assert_eq!(RateLimiter::host_of("not a url"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_rate_per_window() {
        let limiter = RateLimiter::new(2.0);
        let url = "https://example.com/page";

        let mut grant_times = Vec::new();
        for _ in 0..10 {
            limiter.acquire(url).await.unwrap();
            grant_times.push(Instant::now());
        }

        // no more than 2 grants begin within any sliding 1-second window
        for (i, start) in grant_times.iter().enumerate() {
            let in_window = grant_times[i..]
                .iter()
                .take_while(|t| t.duration_since(*start) < Duration::from_secs(1))
                .count();
            assert!(in_window <= 2, "{in_window} grants within one second");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_honored() {
        let limiter = RateLimiter::new(2.0);
        let url = "https://example.com/page";
        let host = limiter.acquire(url).await.unwrap();

        limiter
            .report_rate_limited(&host, Some(Duration::from_secs(2)))
            .await;

        let before = Instant::now();
        limiter.acquire(url).await.unwrap();
        assert!(Instant::now() - before >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hosts_are_independent() {
        let limiter = RateLimiter::new(1.0);
        limiter.acquire("https://a.example.com/x").await.unwrap();
        // a different host is not slowed by the first one's spent token
        let before = Instant::now();
        limiter.acquire("https://b.example.com/x").await.unwrap();
        assert!(Instant::now() - before < Duration::from_millis(100));
    }
}
