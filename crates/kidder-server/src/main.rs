//! # Kidder Server
//!
//! Real-time chat hub over WebSockets.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! kidder
//!
//! # Run with a custom config file
//! KIDDER_CONFIG=/path/to/kidder.toml kidder
//!
//! # Run with environment variables
//! KIDDER_PORT=8080 KIDDER_HOST=0.0.0.0 kidder
//! ```

mod config;
mod handlers;
mod metrics;
mod upload;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kidder=debug,kidder_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Kidder server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
