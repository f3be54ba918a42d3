use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::info;

use crate::client_key::{ClientKey, KeyStrategy};

/// Logging middleware for request/response tracking
///
/// For streamed responses "completed" means the headers went out; the body
/// may still be flowing.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let strategy = request
        .extensions()
        .get::<KeyStrategy>()
        .copied()
        .unwrap_or_default();
    let client = ClientKey::from_headers(request.headers(), strategy);
    let started = Instant::now();

    info!(
        target: "chatgate::middleware",
        method = %method,
        uri = %uri,
        client = %client,
        "Incoming request"
    );

    let response = next.run(request).await;

    info!(
        target: "chatgate::middleware",
        method = %method,
        uri = %uri,
        status = %response.status(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request completed"
    );

    response
}
