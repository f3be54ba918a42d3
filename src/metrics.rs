use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::relay::SessionState;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GatewayMetrics {
    pub total_requests: u64,
    pub admitted_requests: u64,
    pub throttled_requests: u64,
    pub malformed_requests: u64,
    pub completed_sessions: u64,
    pub failed_sessions: u64,
    pub cancelled_sessions: u64,
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    admitted: AtomicU64,
    throttled: AtomicU64,
    malformed: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

/// Process-wide request and session counters. Clones share counters.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    counters: Arc<Counters>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.counters.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.counters.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_admission(&self, allowed: bool) {
        let counter = if allowed {
            &self.counters.admitted
        } else {
            &self.counters.throttled
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_end(&self, state: SessionState) {
        let counter = match state {
            SessionState::Completed => &self.counters.completed,
            SessionState::Failed => &self.counters.failed,
            SessionState::Cancelled => &self.counters.cancelled,
            SessionState::Streaming => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GatewayMetrics {
        let c = &self.counters;
        GatewayMetrics {
            total_requests: c.total.load(Ordering::Relaxed),
            admitted_requests: c.admitted.load(Ordering::Relaxed),
            throttled_requests: c.throttled.load(Ordering::Relaxed),
            malformed_requests: c.malformed.load(Ordering::Relaxed),
            completed_sessions: c.completed.load(Ordering::Relaxed),
            failed_sessions: c.failed.load(Ordering::Relaxed),
            cancelled_sessions: c.cancelled.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_outcomes() {
        let metrics = MetricsCollector::new();
        metrics.record_request();
        metrics.record_request();
        metrics.record_admission(true);
        metrics.record_admission(false);
        metrics.record_session_end(SessionState::Cancelled);
        metrics.record_session_end(SessionState::Streaming);

        let snapshot = metrics.clone().snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.admitted_requests, 1);
        assert_eq!(snapshot.throttled_requests, 1);
        assert_eq!(snapshot.cancelled_sessions, 1);
        assert_eq!(snapshot.completed_sessions, 0);
    }
}
