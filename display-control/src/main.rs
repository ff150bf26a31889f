use std::sync::Arc;

use display_control::config::ConfigService;
use display_control::logging::init_logging;
use display_control::services::ServiceContainer;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    let (logging, _guard) = init_logging(&log_dir)?;

    let config_path =
        std::env::var("DISPLAY_CONTROL_CONFIG").unwrap_or_else(|_| "config.json".to_string());
    let config_service = Arc::new(ConfigService::load_or_create(&config_path).await?);
    info!(path = %config_path, "Configuration loaded");

    let container = ServiceContainer::new(config_service, Some(logging));
    container.start().await?;

    wait_for_shutdown(&container).await?;
    info!("Shutdown signal received");

    container.shutdown().await?;
    Ok(())
}

/// Wait for Ctrl-C or SIGTERM, reloading the configuration on SIGHUP.
#[cfg(unix)]
async fn wait_for_shutdown(container: &ServiceContainer) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            result = &mut ctrl_c => return Ok(result?),
            _ = sigterm.recv() => return Ok(()),
            _ = sighup.recv() => {
                info!("SIGHUP received, reloading configuration");
                // Rejections are logged by the container
                let _ = container.reload_config().await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_container: &ServiceContainer) -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
