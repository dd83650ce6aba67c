//! Drowsiness Monitor - Main Entry Point

use api::{config::AppConfig, init_logging, run_server};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config.server.log_level, config.server.json_logs);

    info!("=== Drowsiness Monitor v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        "Hysteresis threshold {} frames, frame interval {} ms",
        config.dms.hysteresis_threshold, config.dms.frame_interval_ms
    );

    run_server(config).await
}
