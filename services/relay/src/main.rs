use anyhow::{Context, Result};
use attachment_relay::config::Config;
use attachment_relay::discord_listener::{DiscordListener, ListenerError};
use attachment_relay::drive_uploader::connect_optional;
use attachment_relay::fetcher::HttpFetcher;
use attachment_relay::liveness::start_liveness_server;
use attachment_relay::relay_handler::RelayHandler;
use attachment_relay::staging::StagingArea;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        credentials_configured = config.drive.has_credentials(),
        "Starting attachment relay"
    );

    // Initialize metrics
    if let Some(port) = config.service.metrics_port {
        init_metrics(port)?;
    }

    // Missing folder id or bad values stop startup here
    config.validate().context("Invalid configuration")?;

    let Some(token) = config.discord.token.clone() else {
        error!("Discord bot token is not set; nothing to do");
        return Ok(());
    };

    // Initialize components
    let folder_id = config.drive.folder_id()?.to_string();
    let storage = connect_optional(&config.drive).await;

    let staging = StagingArea::prepare(&config.staging.dir)
        .await
        .context("Failed to prepare staging directory")?;

    info!(dir = %staging.dir().display(), "Staging area ready");

    let fetcher = HttpFetcher::new(&config.download).context("Failed to build download client")?;

    let relay = Arc::new(RelayHandler::new(
        Arc::new(fetcher),
        storage,
        staging,
        folder_id,
    ));

    // Spawn liveness server task
    let liveness_handle = if config.liveness.enabled {
        let liveness_config = config.liveness.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = start_liveness_server(&liveness_config).await {
                error!(error = %e, "Liveness server error");
            }
        }))
    } else {
        None
    };

    info!(
        storage_available = relay.storage_available(),
        "Attachment relay started"
    );

    // Run the bot until it disconnects or a shutdown signal arrives
    let listener = DiscordListener::new(relay);

    tokio::select! {
        result = listener.run(&token) => match result {
            Ok(()) => info!("Discord connection closed"),
            Err(ListenerError::InvalidToken) => {
                error!("Failed to log in to Discord: the bot token was rejected");
            }
            Err(e) => error!(error = %e, "Discord listener error"),
        },
        _ = shutdown_signal() => {}
    }

    info!("Shutting down attachment relay");

    // Abort tasks
    if let Some(handle) = liveness_handle {
        handle.abort();
    }

    info!("Attachment relay stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
