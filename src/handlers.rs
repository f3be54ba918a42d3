use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;
use tracing::debug;
use validator::Validate;

use crate::chat::ChatRequest;
use crate::client_key::ClientKey;
use crate::coordinator::RequestCoordinator;
use crate::error::GatewayError;
use crate::health::HealthChecker;

/// Shared application state
pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub coordinator: RequestCoordinator,
    pub health: HealthChecker,
}

impl AppState {
    pub fn new(coordinator: RequestCoordinator) -> Self {
        let health = HealthChecker::new(coordinator.limiter().clone());
        Self {
            coordinator,
            health,
        }
    }
}

/// Streams a chat completion to the caller.
///
/// The body is parsed and validated before admission, so malformed requests
/// never consume a client's tokens.
pub async fn chat(
    State(state): State<SharedState>,
    key: ClientKey,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let metrics = state.coordinator.metrics();
    metrics.record_request();

    let Json(request) = payload.map_err(|rejection| {
        metrics.record_malformed();
        GatewayError::MalformedRequest(rejection.body_text())
    })?;

    request.validate().map_err(|e| {
        metrics.record_malformed();
        GatewayError::MalformedRequest(e.to_string())
    })?;

    debug!(client = %key, messages = request.messages.len(), "Chat request parsed");
    state.coordinator.handle(&key, &request).await
}

/// Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.health.check_health())
}

/// Request and session counters
pub async fn metrics(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.coordinator.metrics().snapshot())
}
