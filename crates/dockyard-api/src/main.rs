//! Dockyard API Service
//!
//! REST API for catalog sources and compose deployments on this host.

use anyhow::{Context, Result};
use dockyard_api::{config::Config, create_router, AppState};
use dockyard_deploy::DockerCompose;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "dockyard_api=debug,dockyard_catalog=debug,dockyard_deploy=debug,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Dockyard API");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        "Configuration loaded - listening on {}",
        config.api_address()
    );

    // Ensure directories exist
    config
        .ensure_directories()
        .context("Failed to create directories")?;
    info!("Data directory: {}", config.data_dir.display());
    info!("Storage directory: {}", config.storage_dir.display());
    info!("Deployment directory: {}", config.deploy_dir.display());

    if config.allow_private_sources {
        info!("Sources on private networks are allowed");
    }

    // Create application state
    let orchestrator = Arc::new(DockerCompose::new(
        config.compose_binary.clone(),
        config.compose_timeout(),
    ));
    let state = AppState::from_config(&config, orchestrator)?;

    // Create router
    let app = create_router(state);

    // Start server
    let listener = TcpListener::bind(&config.api_address())
        .await
        .with_context(|| format!("Failed to bind to {}", config.api_address()))?;

    info!("Dockyard API listening on {}", config.api_address());
    info!("Health check: http://{}/health", config.api_address());

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
