//! Dockyard REST API
//!
//! Registers app catalog sources, exposes the normalized catalog and
//! manages installed compose stacks on this host.
//!
//! ## Endpoints
//!
//! - `GET /api/sources`, `POST /api/sources` - List and register sources
//! - `DELETE /api/sources/{id}`, `POST /api/sources/{id}/refresh`
//! - `GET /api/apps`, `GET /api/apps/{id}` - Normalized catalog
//! - `GET /api/apps/{id}/compose`, `GET /api/apps/{id}/truenas`
//! - `POST /api/install` - Install a catalog app
//! - `GET /api/manage/apps` - Installed apps
//! - `GET|PUT /api/manage/apps/{name}/compose`
//! - `POST /api/manage/apps/{name}/action`, `POST /api/manage/apps/{name}/delete`
//! - `GET|POST /api/settings`
//! - `GET /storage/...` - Cached bundle files (icons, screenshots, compose files)
//! - `GET /health` - Health check

pub mod config;
pub mod handlers;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use config::Config;
use dockyard_catalog::{Catalog, SettingsStore, SourceRegistry};
use dockyard_deploy::{DeploymentController, DeploymentStore, Orchestrator};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

/// Application state shared across handlers
pub struct AppState {
    pub catalog: Catalog,

    pub controller: DeploymentController,
}

impl AppState {
    /// Create new application state
    pub fn new(catalog: Catalog, controller: DeploymentController) -> Self {
        Self {
            catalog,
            controller,
        }
    }

    /// Wire stores, catalog and controller from configuration
    pub fn from_config(config: &Config, orchestrator: Arc<dyn Orchestrator>) -> Result<Self> {
        let registry = Arc::new(SourceRegistry::open(config.sources_file()));
        let settings = Arc::new(SettingsStore::open(config.settings_file()));
        let catalog = Catalog::new(config.catalog_config(), registry, settings)
            .context("Failed to create catalog")?;

        let store = Arc::new(DeploymentStore::new(config.deploy_dir.clone()));
        let controller = DeploymentController::new(store, orchestrator);

        Ok(Self::new(catalog, controller))
    }
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let storage = ServeDir::new(state.catalog.storage_root());
    let state = Arc::new(state);

    Router::new()
        // Health check
        .route("/health", get(handlers::health_handler))
        // Catalog sources
        .route(
            "/api/sources",
            get(handlers::list_sources_handler).post(handlers::add_source_handler),
        )
        .route(
            "/api/sources/{id}",
            axum::routing::delete(handlers::delete_source_handler),
        )
        .route(
            "/api/sources/{id}/refresh",
            post(handlers::refresh_source_handler),
        )
        // Normalized catalog
        .route("/api/apps", get(handlers::list_apps_handler))
        .route("/api/apps/{id}", get(handlers::get_app_handler))
        .route("/api/apps/{id}/compose", get(handlers::get_app_compose_handler))
        .route("/api/apps/{id}/truenas", get(handlers::get_app_truenas_handler))
        .route("/api/install", post(handlers::install_handler))
        // Installed apps
        .route("/api/manage/apps", get(handlers::list_installed_handler))
        .route(
            "/api/manage/apps/{name}/compose",
            get(handlers::get_installed_compose_handler)
                .put(handlers::put_installed_compose_handler),
        )
        .route(
            "/api/manage/apps/{name}/action",
            post(handlers::action_handler),
        )
        .route(
            "/api/manage/apps/{name}/delete",
            post(handlers::delete_installed_handler),
        )
        // Settings
        .route(
            "/api/settings",
            get(handlers::get_settings_handler).post(handlers::save_settings_handler),
        )
        // Cached bundle files
        .nest_service("/storage", storage)
        // Middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
