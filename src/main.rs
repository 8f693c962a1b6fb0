// src/main.rs
mod admission;
mod api;
mod backend;
mod capacity;
mod config;
mod executor;
mod model;
mod pipeline;
mod plan;
mod reconcile;
mod suggestions;
#[cfg(test)]
mod testing;
mod wire;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::AppConfig;

#[tokio::main]
async fn main() {
    // Loaded before the subscriber so RUST_LOG may come from .env.
    let dotenv_result = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    if let Err(err) = dotenv_result {
        if !matches!(err, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            warn!("⚠️ Could not load .env: {}", err);
        }
    }

    let app_config = AppConfig::from_env();

    info!("🚀 Stowage rearrangement service starting...");
    if let Err(err) = api::start_api_server(app_config).await {
        error!("❌ {}", err);
        std::process::exit(1);
    }
}
