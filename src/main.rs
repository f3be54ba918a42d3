use anyhow::{Context, Result};
use chatgate::config::Config;
use chatgate::server::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("chatgate={},tower_http=debug", config.log_level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; flags and the process environment still apply.
    dotenv::dotenv().ok();

    let config = Config::from_env();
    init_tracing(&config);

    tracing::info!(
        bind_addr = %config.bind_addr,
        max_tokens = config.max_tokens,
        window_ms = config.window_ms,
        key_strategy = ?config.key_strategy,
        model = %config.model_id,
        "Starting chat gateway"
    );

    let server = Server::new(config)
        .await
        .context("invalid gateway configuration")?;

    server.run().await.context("gateway stopped with an error")
}
