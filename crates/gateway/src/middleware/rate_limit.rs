//! Rate limiting middleware using token bucket algorithm

use axum::{extract::Request, middleware::Next, response::Response};
use governor::{
    clock::QuantaClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use waypoint_common::errors::AppError;

/// Rate limiter using governor crate
pub type GlobalRateLimiter = RateLimiter<NotKeyed, InMemoryState, QuantaClock>;

/// Limiter plus the rate it enforces
pub struct RateLimit {
    pub limiter: GlobalRateLimiter,
    pub requests_per_second: u32,
}

impl RateLimit {
    pub fn check(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

/// Create a new rate limiter; a zero rate is raised to one
pub fn create_rate_limiter(requests_per_second: u32, burst: u32) -> Arc<RateLimit> {
    let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(burst).unwrap_or(rate);
    let quota = Quota::per_second(rate).allow_burst(burst);

    Arc::new(RateLimit {
        limiter: RateLimiter::direct(quota),
        requests_per_second: rate.get(),
    })
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    request: Request,
    next: Next,
    limit: Arc<RateLimit>,
) -> Result<Response, AppError> {
    if limit.check() {
        return Ok(next.run(request).await);
    }
    tracing::warn!(path = %request.uri().path(), "Rate limit exceeded");
    Err(AppError::RateLimited {
        limit: limit.requests_per_second,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_creation() {
        let limit = create_rate_limiter(100, 200);
        assert!(limit.check());
        assert_eq!(limit.requests_per_second, 100);
    }

    #[test]
    fn test_burst_exhaustion() {
        let limit = create_rate_limiter(1, 2);
        assert!(limit.check());
        assert!(limit.check());
        assert!(!limit.check());
    }

    #[test]
    fn test_zero_quota_is_raised() {
        let limit = create_rate_limiter(0, 0);
        assert!(limit.check());
        assert_eq!(limit.requests_per_second, 1);
    }
}
