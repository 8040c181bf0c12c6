//! Token bucket rate limiter
//!
//! Keeps market-data requests within provider limits. Tokens refill
//! continuously at `requests_per_second`; the bucket never holds more than
//! `burst` tokens.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep, Instant};

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub requests_per_second: f64,
    pub burst: usize,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 5.0,
            burst: 5,
        }
    }
}

impl RateLimiterConfig {
    pub fn with_rate(mut self, requests_per_second: f64) -> Self {
        self.requests_per_second = requests_per_second;
        self
    }

    pub fn with_burst(mut self, burst: usize) -> Self {
        self.burst = burst;
        self
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket shared by all requests of one provider
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    rate: f64,
    capacity: f64,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let capacity = config.burst.max(1) as f64;
        Self {
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            rate: config.requests_per_second.max(f64::MIN_POSITIVE),
            capacity,
        }
    }

    /// Wait until a token is available and consume it
    pub async fn acquire(&self) {
        loop {
            match self.take_or_wait() {
                None => return,
                Some(wait) => sleep(wait).await,
            }
        }
    }

    /// Consume a token if one is available right now
    pub fn try_acquire(&self) -> bool {
        self.take_or_wait().is_none()
    }

    /// Whole tokens currently available
    pub fn available(&self) -> usize {
        let mut bucket = self.lock();
        self.refill(&mut bucket);
        bucket.tokens.floor() as usize
    }

    /// Takes a token, or returns how long until one is available
    fn take_or_wait(&self) -> Option<Duration> {
        let mut bucket = self.lock();
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            None
        } else {
            Some(Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate))
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.capacity);
        bucket.last_refill = now;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_full() {
        let limiter = RateLimiter::new(RateLimiterConfig::default().with_burst(3));
        assert_eq!(limiter.available(), 3);
    }

    #[test]
    fn test_try_acquire_exhausts_bucket() {
        let config = RateLimiterConfig::default().with_rate(0.001).with_burst(2);
        let limiter = RateLimiter::new(config);

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let config = RateLimiterConfig::default().with_rate(50.0).with_burst(1);
        let limiter = RateLimiter::new(config);

        limiter.acquire().await;
        let started = Instant::now();
        limiter.acquire().await;
        // one token every 20ms
        assert!(started.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_zero_burst_still_allows_one() {
        let limiter = RateLimiter::new(RateLimiterConfig::default().with_burst(0));
        assert!(limiter.try_acquire());
    }
}
