//! Request plumbing shared by the HTTP providers
//!
//! - Circuit breaker that stops hammering a provider that keeps failing
//! - Token bucket rate limiter
//!
//! [`RequestGuard`] bundles both so every provider wraps its calls the same way.

pub mod circuit_breaker;
pub mod rate_limiter;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};

use std::future::Future;

use crate::providers::ProviderError;

/// Rate limit + circuit breaker around a provider's outbound requests
#[derive(Debug)]
pub struct RequestGuard {
    rate_limiter: RateLimiter,
    circuit_breaker: CircuitBreaker,
}

impl Default for RequestGuard {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default(), CircuitBreakerConfig::default())
    }
}

impl RequestGuard {
    pub fn new(rate: RateLimiterConfig, breaker: CircuitBreakerConfig) -> Self {
        Self {
            rate_limiter: RateLimiter::new(rate),
            circuit_breaker: CircuitBreaker::new(breaker),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    /// Run one request. Transport and server errors count against the
    /// breaker; errors about the instrument itself do not.
    pub async fn run<T, F, Fut>(&self, request: F) -> Result<T, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        if !self.circuit_breaker.can_attempt() {
            return Err(ProviderError::CircuitBreakerOpen);
        }

        self.rate_limiter.acquire().await;

        let result = request().await;
        match &result {
            Ok(_) => self.circuit_breaker.record_success(),
            Err(e) if e.is_transient() => self.circuit_breaker.record_failure(),
            Err(_) => self.circuit_breaker.record_success(),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(threshold: u32) -> RequestGuard {
        RequestGuard::new(
            RateLimiterConfig::default().with_rate(1000.0).with_burst(100),
            CircuitBreakerConfig::default().with_failure_threshold(threshold),
        )
    }

    #[tokio::test]
    async fn test_passes_results_through() {
        let guard = guard(3);
        let value = guard.run(|| async { Ok::<_, ProviderError>(7) }).await;
        assert_eq!(value.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_transient_failures_open_breaker() {
        let guard = guard(2);
        for _ in 0..2 {
            let _ = guard
                .run(|| async {
                    Err::<(), _>(ProviderError::Api {
                        status: 503,
                        message: "unavailable".into(),
                    })
                })
                .await;
        }
        assert_eq!(guard.state(), CircuitState::Open);

        let blocked = guard.run(|| async { Ok::<_, ProviderError>(()) }).await;
        assert!(matches!(blocked, Err(ProviderError::CircuitBreakerOpen)));
    }

    #[tokio::test]
    async fn test_instrument_errors_do_not_trip() {
        let guard = guard(1);
        let _ = guard
            .run(|| async { Err::<(), _>(ProviderError::UnknownInstrument("XYZ.NS".into())) })
            .await;
        assert_eq!(guard.state(), CircuitState::Closed);
    }
}
