use std::sync::Arc;
use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use zerobyte_server::{ServerConfig, server::{ServerState, run_server}};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,zerobyte_server=debug,zerobyte_volumes=debug".into()),
        )
        .init();

    tracing::info!("Zerobyte server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration from environment or defaults
    let config = ServerConfig::from_env()?;

    tracing::info!("Data directory: {}", config.data_dir);
    tracing::info!("Repository base: {}", config.repository_base);
    tracing::info!("Volume base: {}", config.volume_base);

    let state = Arc::new(ServerState::from_config(config).await?);

    run_server(state).await?;

    Ok(())
}
