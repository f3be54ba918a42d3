use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::time::Duration;
use tracing::error;

use crate::generation::GenerationError;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: Duration },

    #[error("Invalid request: {0}")]
    MalformedRequest(String),

    #[error("Generation failed to start: {0}")]
    Generation(#[from] GenerationError),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Generation(_)
            | GatewayError::Internal(_)
            | GatewayError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Server-side details stay in the logs.
        let body = if status.is_server_error() {
            error!(error = %self, "Request failed before streaming");
            "Internal Server Error".to_string()
        } else {
            self.to_string()
        };

        let mut response = (status, body).into_response();

        if let GatewayError::RateLimitExceeded { retry_after } = &self {
            let secs = retry_after.as_secs_f64().ceil().max(1.0) as u64;
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }

        response
    }
}
