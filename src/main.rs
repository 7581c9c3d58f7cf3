use anyhow::Result;
use clap::Parser;
use token_throttle::config::Config;
use token_throttle::server::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = Config::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("token_throttle={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting rate limiter service");
    tracing::info!(
        "Configuration: bind_addr={}, idle_ttl_secs={}, cleanup_interval_secs={}",
        config.bind_addr,
        config.idle_ttl_secs,
        config.cleanup_interval_secs
    );

    let server = Server::new(config)
        .map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;

    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
