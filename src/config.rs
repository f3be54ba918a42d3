use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::client_key::KeyStrategy;
use crate::error::GatewayError;
use crate::token_bucket::BucketPolicy;

#[derive(Debug, Clone, Parser)]
#[command(name = "chatgate", version, about = "Rate-limited streaming chat gateway")]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Requests a client may make per refill window
    #[arg(long, env = "RATE_LIMIT_MAX_TOKENS", default_value_t = 10)]
    pub max_tokens: u32,

    /// Refill window in milliseconds
    #[arg(long, env = "RATE_LIMIT_WINDOW_MS", default_value_t = 10_000)]
    pub window_ms: u64,

    /// Idle time after which a client's bucket is dropped
    #[arg(long, env = "BUCKET_IDLE_TTL_SECS", default_value_t = 600)]
    pub bucket_idle_ttl_secs: u64,

    /// How often idle buckets are swept; 0 disables the sweeper
    #[arg(long, env = "BUCKET_SWEEP_INTERVAL_SECS", default_value_t = 60)]
    pub bucket_sweep_interval_secs: u64,

    /// How the client key is read from X-Forwarded-For
    #[arg(long, env = "KEY_STRATEGY", value_enum, default_value_t = KeyStrategy::ForwardedHeader)]
    pub key_strategy: KeyStrategy,

    /// Fragments allowed in flight between the model and the client
    #[arg(long, env = "RELAY_BUFFER", default_value_t = 1)]
    pub relay_buffer: usize,

    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true, default_value = "")]
    pub gemini_api_key: String,

    /// Model used for generation
    #[arg(long, env = "MODEL_ID", default_value = "gemini-2.5-flash")]
    pub model_id: String,

    /// Base URL of the Gemini API
    #[arg(long, env = "GEMINI_BASE_URL", default_value = "https://generativelanguage.googleapis.com")]
    pub gemini_base_url: String,

    /// Profile text included in every prompt
    #[arg(long, env = "PROFILE_PATH", default_value = "data/profile.md")]
    pub profile_path: PathBuf,

    /// Log level for this crate
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Parse from command line arguments and environment variables
    pub fn from_env() -> Self {
        Config::parse()
    }

    pub fn bucket_policy(&self) -> BucketPolicy {
        BucketPolicy {
            max_tokens: self.max_tokens,
            window_ms: self.window_ms,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn bucket_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.bucket_idle_ttl_secs)
    }

    pub fn bucket_sweep_interval(&self) -> Option<Duration> {
        (self.bucket_sweep_interval_secs > 0)
            .then(|| Duration::from_secs(self.bucket_sweep_interval_secs))
    }

    /// Checks values that clap cannot.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.max_tokens == 0 {
            return Err(GatewayError::Configuration(
                "Rate limit capacity must be greater than 0".to_string(),
            ));
        }

        if self.window_ms == 0 {
            return Err(GatewayError::Configuration(
                "Refill window must be greater than 0".to_string(),
            ));
        }

        if self.relay_buffer == 0 {
            return Err(GatewayError::Configuration(
                "Relay buffer must hold at least one fragment".to_string(),
            ));
        }

        // Eviction must not be able to hand out a fresh bucket before a full
        // window has passed.
        if self.bucket_idle_ttl() < self.window() {
            return Err(GatewayError::Configuration(format!(
                "Bucket idle TTL ({}s) must be at least one refill window ({}ms)",
                self.bucket_idle_ttl_secs, self.window_ms
            )));
        }

        if self.gemini_api_key.trim().is_empty() {
            return Err(GatewayError::Configuration(
                "GEMINI_API_KEY must be set".to_string(),
            ));
        }

        Ok(())
    }
}
