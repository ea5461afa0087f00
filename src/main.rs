mod backend;
mod config;
mod images;
mod relay;
mod telegram;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::backend::BackendClient;
use crate::config::Config;
use crate::images::HttpImageFetcher;
use crate::relay::Relay;
use crate::telegram::TelegramClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pricewatch=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Backend: {}", config.backend.base_url);
    info!("  Poll interval: {}s", config.relay.poll_interval_secs);

    let chat = TelegramClient::new(&config.telegram);
    let backend = BackendClient::new(&config.backend);
    let images = HttpImageFetcher::new();

    info!("Relay is starting...");
    let mut relay = Relay::new(
        chat,
        backend,
        images,
        Duration::from_secs(config.relay.poll_interval_secs),
    );

    relay.run().await
}
