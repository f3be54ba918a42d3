pub mod chat;
pub mod client_key;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod generation;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod middleware;
pub mod prompt;
pub mod rate_limiter;
pub mod relay;
pub mod server;
pub mod token_bucket;

pub use config::Config;
pub use coordinator::RequestCoordinator;
pub use error::{GatewayError, Result};
pub use rate_limiter::RateLimiter;
pub use relay::{RelaySession, SessionState, StreamRelay};
pub use server::create_app;
