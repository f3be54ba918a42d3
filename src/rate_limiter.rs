use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::clock::{SystemClock, TimeSource};
use crate::token_bucket::{BucketPolicy, TokenBucket};

/// Keyed token-bucket admission gate.
///
/// Buckets live in a sharded map; the read-refill-decrement sequence for a
/// key runs while holding that key's shard lock, so concurrent checks on one
/// key are serialized and unrelated keys rarely contend. Clones share state.
#[derive(Clone)]
pub struct RateLimiter {
    policy: BucketPolicy,
    buckets: Arc<DashMap<String, TokenBucket>>,
    clock: Arc<dyn TimeSource>,
}

impl RateLimiter {
    pub fn new(policy: BucketPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    pub fn with_clock(policy: BucketPolicy, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            policy,
            buckets: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Admits one request for `key`, consuming a token. Returns `false`
    /// without consuming anything when the bucket is empty.
    pub fn admit(&self, key: &str) -> bool {
        let now = self.clock.now_millis();

        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(&self.policy, now));

        let allowed = bucket.try_consume(&self.policy, now);
        debug!(key, allowed, remaining = bucket.tokens(), "Admission check");
        allowed
    }

    /// Tokens left for `key` without touching its bucket.
    pub fn remaining(&self, key: &str) -> u32 {
        self.buckets
            .get(key)
            .map(|bucket| bucket.tokens())
            .unwrap_or(self.policy.max_tokens)
    }

    pub fn policy(&self) -> &BucketPolicy {
        &self.policy
    }

    /// Number of client keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }

    /// Drops buckets that have not been checked for at least `ttl`.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let now = self.clock.now_millis();
        let ttl_ms = ttl.as_millis() as u64;

        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| !bucket.is_idle(now, ttl_ms));
        before.saturating_sub(self.buckets.len())
    }

    /// Runs [`evict_idle`](Self::evict_idle) every `interval` until `shutdown`
    /// is cancelled.
    pub fn spawn_sweeper(
        &self,
        interval: Duration,
        ttl: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let limiter = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = limiter.evict_idle(ttl);
                        if evicted > 0 {
                            info!(evicted, tracked = limiter.tracked_keys(), "Evicted idle rate limit buckets");
                        }
                    }
                }
            }

            debug!("Bucket sweeper stopped");
        })
    }
}
