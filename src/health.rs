use serde::{Deserialize, Serialize};
use std::time::{Instant, SystemTime};

use crate::rate_limiter::RateLimiter;
use crate::token_bucket::BucketPolicy;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub rate_limiter: LimiterStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LimiterStatus {
    pub tracked_clients: usize,
    pub max_tokens: u32,
    pub window_ms: u64,
}

pub struct HealthChecker {
    rate_limiter: RateLimiter,
    started_at: Instant,
}

impl HealthChecker {
    pub fn new(rate_limiter: RateLimiter) -> Self {
        Self {
            rate_limiter,
            started_at: Instant::now(),
        }
    }

    pub fn check_health(&self) -> HealthStatus {
        let BucketPolicy {
            max_tokens,
            window_ms,
        } = *self.rate_limiter.policy();

        HealthStatus {
            status: "healthy".to_string(),
            timestamp: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            rate_limiter: LimiterStatus {
                tracked_clients: self.rate_limiter.tracked_keys(),
                max_tokens,
                window_ms,
            },
        }
    }
}
