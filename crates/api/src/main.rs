//! Weather Station Backend - Main Entry Point

use api::{config::AppConfig, init_logging, run};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config.logging)?;

    info!("=== Weather Station v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        "Ingesting {} from {}:{} into {}",
        config.mqtt.topic, config.mqtt.host, config.mqtt.port, config.database.url
    );

    run(config).await?;

    Ok(())
}
