//! Rate limiting middleware using token bucket algorithm

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use docsage_common::config::RateLimitConfig;
use docsage_common::errors::{AppError, Result};
use governor::{
    clock::QuantaClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter using governor crate
pub type GlobalRateLimiter = RateLimiter<NotKeyed, InMemoryState, QuantaClock>;

/// Limiter plus the configured rate, reported back in 429 responses
#[derive(Clone)]
pub struct RateLimit {
    limiter: Arc<GlobalRateLimiter>,
    requests_per_second: u32,
}

impl RateLimit {
    pub fn check(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

/// Create a new rate limiter
pub fn create_rate_limiter(config: &RateLimitConfig) -> Result<RateLimit> {
    let per_second = NonZeroU32::new(config.requests_per_second)
        .ok_or_else(|| AppError::config("rate_limit.requests_per_second must be positive"))?;
    let burst = NonZeroU32::new(config.burst)
        .ok_or_else(|| AppError::config("rate_limit.burst must be positive"))?;

    Ok(RateLimit {
        limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second).allow_burst(burst))),
        requests_per_second: config.requests_per_second,
    })
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(limit): State<RateLimit>,
    request: Request,
    next: Next,
) -> Result<Response> {
    if limit.check() {
        return Ok(next.run(request).await);
    }

    tracing::warn!(path = %request.uri().path(), "Rate limit exceeded");
    Err(AppError::RateLimited {
        limit: limit.requests_per_second,
    })
}
