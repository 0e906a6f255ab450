use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use camfleet::api::{ApiServer, AppState};
use camfleet::config::AppConfig;
use camfleet::logging::init_logging;
use camfleet::stream::StreamManager;
use camfleet::utils::fs::ensure_dir_all_with_op;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("invalid configuration")?;

    let (logging_config, _log_guard) =
        init_logging(&config.log_dir).context("failed to initialize logging")?;
    let background = CancellationToken::new();
    logging_config.start_retention_cleanup(background.clone());

    ensure_dir_all_with_op("creating HLS root", &config.hls_root).await?;
    ensure_dir_all_with_op("creating recordings directory", &config.recordings_dir).await?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        hls_root = %config.hls_root.display(),
        recordings = %config.recordings_dir.display(),
        templates = config.rtsp_templates.len(),
        "camfleet starting"
    );

    let manager = StreamManager::from_app_config(&config);
    let state = AppState::new(Arc::clone(&manager), config.hls_root.clone())
        .with_logging_config(logging_config);
    let server = ApiServer::new(config.api_server_config(), state);

    let server_token = server.cancel_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        server_token.cancel();
    });

    let served = server.run().await;

    manager.shutdown().await;
    background.cancel();
    info!("camfleet stopped");

    served.context("API server failed")
}
