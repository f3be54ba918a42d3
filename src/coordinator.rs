//! Per-request orchestration.
//!
//! `Received -> RateChecked -> {Rejected | Admitted} -> Streaming ->
//! {Completed | Failed | Cancelled}`. Everything up to `Streaming` happens
//! before a response exists, so those failures still get a status code.
//! Afterwards the only signal left is how the body ends.

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chat::ChatRequest;
use crate::client_key::ClientKey;
use crate::error::{GatewayError, Result};
use crate::generation::GenerationSource;
use crate::metrics::MetricsCollector;
use crate::prompt::PromptBuilder;
use crate::rate_limiter::RateLimiter;
use crate::relay::{RelaySession, SessionState, StreamRelay};

pub const STREAM_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

#[derive(Clone)]
pub struct RequestCoordinator {
    limiter: RateLimiter,
    prompts: Arc<PromptBuilder>,
    source: Arc<dyn GenerationSource>,
    relay: StreamRelay,
    metrics: MetricsCollector,
}

impl RequestCoordinator {
    pub fn new(
        limiter: RateLimiter,
        prompts: PromptBuilder,
        source: Arc<dyn GenerationSource>,
        relay: StreamRelay,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            limiter,
            prompts: Arc::new(prompts),
            source,
            relay,
            metrics,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Admits, starts generation and returns the session feeding the body.
    ///
    /// Returns as soon as the generation stream exists; fragments flow
    /// while the caller is already sending the response.
    pub async fn open_session(&self, key: &ClientKey, request: &ChatRequest) -> Result<RelaySession> {
        if !self.limiter.admit(key.as_str()) {
            self.metrics.record_admission(false);
            info!(client = %key, "Request rejected by rate limiter");
            return Err(GatewayError::RateLimitExceeded {
                retry_after: Duration::from_millis(self.limiter.policy().window_ms),
            });
        }
        self.metrics.record_admission(true);

        let prompt = self.prompts.build(&request.messages);
        debug!(client = %key, prompt_len = prompt.len(), "Admitted, starting generation");

        let fragments = self.source.start(prompt).await?;
        let session = self.relay.start(fragments);
        info!(client = %key, session = %session.id(), "Streaming response");

        self.observe(key, &session);
        Ok(session)
    }

    /// Handles one chat request end to end, producing the streaming response.
    pub async fn handle(&self, key: &ClientKey, request: &ChatRequest) -> Result<Response> {
        let session = self.open_session(key, request).await?;
        let remaining = self.limiter.remaining(key.as_str());

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, HeaderValue::from_static(STREAM_CONTENT_TYPE))
            .header(header::CACHE_CONTROL, HeaderValue::from_static("no-store"))
            .header(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(self.limiter.policy().max_tokens))
            .header(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from(remaining))
            .body(Body::from_stream(session))
            .map_err(|e| GatewayError::Internal(format!("Failed to build response: {e}")))
    }

    /// Logs and counts the session's terminal state once it is reached.
    fn observe(&self, key: &ClientKey, session: &RelaySession) {
        let watch = session.watch();
        let metrics = self.metrics.clone();
        let client = key.clone();
        let id = session.id();

        tokio::spawn(async move {
            let state = watch.terminal().await;
            metrics.record_session_end(state);
            match state {
                SessionState::Failed => {
                    warn!(client = %client, session = %id, "Stream aborted after generation failure")
                }
                _ => info!(client = %client, session = %id, state = ?state, "Stream finished"),
            }
        });
    }
}
