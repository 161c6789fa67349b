//! # Roomcast Server
//!
//! Room-based messaging with live WebSocket updates.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! roomcast
//!
//! # Run with custom config
//! roomcast --config /path/to/roomcast.toml
//!
//! # Run with environment variables
//! ROOMCAST_PORT=8080 ROOMCAST_HOST=0.0.0.0 roomcast
//! ```

mod config;
mod error;
mod handlers;
mod metrics;
mod store;

use anyhow::{bail, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roomcast=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match config_path_arg(std::env::args().skip(1))? {
        Some(path) => config::Config::from_file(path)?,
        None => config::Config::load()?,
    };

    tracing::info!("Starting Roomcast server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}

/// Extract the value of `--config <path>` (or `--config=<path>`).
fn config_path_arg(mut args: impl Iterator<Item = String>) -> Result<Option<String>> {
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return match args.next() {
                Some(path) => Ok(Some(path)),
                None => bail!("--config requires a path"),
            };
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Ok(Some(path.to_string()));
        }
    }
    Ok(None)
}
