/// Bucket sizing shared by every client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketPolicy {
    pub max_tokens: u32,
    pub window_ms: u64,
}

impl Default for BucketPolicy {
    fn default() -> Self {
        Self {
            max_tokens: 10,
            window_ms: 10_000,
        }
    }
}

/// Per-client token bucket with whole-window refill.
///
/// A bucket is refilled to capacity once a full window has elapsed since the
/// previous check. The reference timestamp moves on every check, whether or
/// not anything was refilled, so a client that keeps calling more often than
/// once per window never sees a refill until it goes quiet for a full window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBucket {
    tokens: u32,
    last_update: u64,
}

impl TokenBucket {
    /// A full bucket whose clock starts at `now`.
    pub fn new(policy: &BucketPolicy, now: u64) -> Self {
        Self {
            tokens: policy.max_tokens,
            last_update: now,
        }
    }

    /// Refills, then tries to take one token. Returns whether a token was taken.
    pub fn try_consume(&mut self, policy: &BucketPolicy, now: u64) -> bool {
        self.refill(policy, now);

        if self.tokens == 0 {
            return false;
        }

        self.tokens -= 1;
        true
    }

    pub fn tokens(&self) -> u32 {
        self.tokens
    }

    pub fn last_update(&self) -> u64 {
        self.last_update
    }

    /// Whether the bucket has gone unchecked for at least `ttl_ms`.
    pub fn is_idle(&self, now: u64, ttl_ms: u64) -> bool {
        now.saturating_sub(self.last_update) >= ttl_ms
    }

    fn refill(&mut self, policy: &BucketPolicy, now: u64) {
        // A clock that steps backwards counts as zero elapsed time and never
        // moves last_update backwards.
        let now = now.max(self.last_update);
        let elapsed = now - self.last_update;
        let windows = elapsed / policy.window_ms.max(1);

        let refill = windows.saturating_mul(policy.max_tokens as u64);
        let tokens = (self.tokens as u64).saturating_add(refill);
        self.tokens = tokens.min(policy.max_tokens as u64) as u32;
        self.last_update = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BucketPolicy {
        BucketPolicy {
            max_tokens: 3,
            window_ms: 1_000,
        }
    }

    #[test]
    fn test_new_bucket_is_full() {
        let bucket = TokenBucket::new(&policy(), 500);
        assert_eq!(bucket.tokens(), 3);
        assert_eq!(bucket.last_update(), 500);
    }

    #[test]
    fn test_token_consumption() {
        let policy = policy();
        let mut bucket = TokenBucket::new(&policy, 0);

        assert!(bucket.try_consume(&policy, 0));
        assert!(bucket.try_consume(&policy, 0));
        assert!(bucket.try_consume(&policy, 0));
        assert_eq!(bucket.tokens(), 0);
        assert!(!bucket.try_consume(&policy, 0));
        assert_eq!(bucket.tokens(), 0);
    }

    #[test]
    fn test_full_window_refills_to_capacity() {
        let policy = policy();
        let mut bucket = TokenBucket::new(&policy, 0);
        for _ in 0..3 {
            bucket.try_consume(&policy, 0);
        }

        assert!(bucket.try_consume(&policy, 1_000));
        assert_eq!(bucket.tokens(), 2);
    }

    #[test]
    fn test_capacity_overflow_prevention() {
        let policy = policy();
        let mut bucket = TokenBucket::new(&policy, 0);
        bucket.try_consume(&policy, 0);

        // Many windows later the bucket is still capped.
        assert!(bucket.try_consume(&policy, 50_000));
        assert_eq!(bucket.tokens(), 2);
    }

    #[test]
    fn test_partial_window_resets_reference_time() {
        let policy = policy();
        let mut bucket = TokenBucket::new(&policy, 0);
        for _ in 0..3 {
            bucket.try_consume(&policy, 0);
        }

        // 900ms + 900ms is more than a window in total, but never a full
        // window between two checks.
        assert!(!bucket.try_consume(&policy, 900));
        assert_eq!(bucket.last_update(), 900);
        assert!(!bucket.try_consume(&policy, 1_800));
        assert_eq!(bucket.tokens(), 0);

        assert!(bucket.try_consume(&policy, 2_800));
    }

    #[test]
    fn test_backwards_clock_does_not_rewind() {
        let policy = policy();
        let mut bucket = TokenBucket::new(&policy, 5_000);

        assert!(bucket.try_consume(&policy, 4_000));
        assert_eq!(bucket.last_update(), 5_000);
    }

    #[test]
    fn test_idle_detection() {
        let bucket = TokenBucket::new(&policy(), 1_000);
        assert!(!bucket.is_idle(1_500, 1_000));
        assert!(bucket.is_idle(2_000, 1_000));
    }
}
