use axum::routing::{get, post};
use axum::{middleware, Extension, Router};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::client_key::KeyStrategy;
use crate::config::Config;
use crate::coordinator::RequestCoordinator;
use crate::error::GatewayError;
use crate::generation::{GeminiSource, GenerationSource};
use crate::handlers::{chat, health_check, metrics, AppState, SharedState};
use crate::metrics::MetricsCollector;
use crate::middleware::logging_middleware;
use crate::prompt::{PromptBuilder, DEFAULT_SYSTEM_PROMPT};
use crate::rate_limiter::RateLimiter;
use crate::relay::StreamRelay;

/// Builds the router around an already assembled coordinator.
pub fn create_app(coordinator: RequestCoordinator, key_strategy: KeyStrategy) -> Router {
    let state: SharedState = Arc::new(AppState::new(coordinator));

    Router::new()
        .route("/api/chat", post(chat))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(Extension(key_strategy))
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

pub struct Server {
    config: Config,
    coordinator: RequestCoordinator,
}

impl Server {
    /// Assembles the service with the Gemini generation source.
    pub async fn new(config: Config) -> Result<Self, GatewayError> {
        config.validate()?;

        let source = GeminiSource::new(
            config.gemini_base_url.clone(),
            config.model_id.clone(),
            config.gemini_api_key.clone(),
        );
        Ok(Self::with_source(config, Arc::new(source)).await)
    }

    pub async fn with_source(config: Config, source: Arc<dyn GenerationSource>) -> Self {
        let prompts = PromptBuilder::from_profile_file(DEFAULT_SYSTEM_PROMPT, &config.profile_path).await;
        let coordinator = RequestCoordinator::new(
            RateLimiter::new(config.bucket_policy()),
            prompts,
            source,
            StreamRelay::new(config.relay_buffer),
            MetricsCollector::new(),
        );

        Self {
            config,
            coordinator,
        }
    }

    pub async fn run(self) -> Result<(), GatewayError> {
        let shutdown = CancellationToken::new();

        let sweeper = self.config.bucket_sweep_interval().map(|interval| {
            self.coordinator.limiter().spawn_sweeper(
                interval,
                self.config.bucket_idle_ttl(),
                shutdown.clone(),
            )
        });

        let app = create_app(self.coordinator, self.config.key_strategy);
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| GatewayError::Internal(format!("Failed to bind {}: {e}", self.config.bind_addr)))?;

        info!("Chat gateway listening on {}", self.config.bind_addr);
        info!("Chat endpoint available at POST /api/chat");
        info!("Health check available at /health");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
            .await
            .map_err(|e| GatewayError::Internal(format!("Server error: {e}")));

        shutdown.cancel();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.await;
        }

        result
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        },
        _ = shutdown.cancelled() => {},
    }

    shutdown.cancel();
}
