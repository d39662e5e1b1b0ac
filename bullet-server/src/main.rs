// Standalone stream server. Configuration comes from BULLET_CONFIG (a TOML
// file) and BULLET_* environment variables.

use anyhow::Context;
use bullet_eye::{DefaultDetector, DetectionState, DetectorConfig};
use bullet_server::{serve, shutdown_signal, StreamState};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config_path = std::env::var_os("BULLET_CONFIG").map(PathBuf::from);
    let config = DetectorConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    info!("Loading model from {}", config.model_path.display());
    let detector = tokio::task::spawn_blocking({
        let config = config.clone();
        move || DefaultDetector::from_config(&config)
    })
    .await?
    .context("Failed to create detector")?;

    let detection = Arc::new(DetectionState::new());
    let state = StreamState::new(detector, detection.clone());

    serve(&config.bind_address, state, shutdown_signal(detection)).await
}
