//! API request handlers for catalog and deployment operations

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dockyard_catalog::{generate_truenas_values, Settings};
use dockyard_common::{Application, Error, Source, SourceVariant};
use dockyard_deploy::{ComposeAction, Deployment, InstalledApp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::AppState;

/// Request to register a catalog source
#[derive(Debug, Deserialize)]
pub struct AddSourceRequest {
    /// Catalog URL (`.zip` archive or JSON document)
    pub url: String,

    /// Optional catalog dialect
    #[serde(default)]
    pub variant: Option<SourceVariant>,
}

/// Request to install an application from the catalog
#[derive(Debug, Deserialize)]
pub struct InstallRequest {
    /// Application ID
    pub app: String,
}

/// Compose text of an installed app
#[derive(Debug, Serialize, Deserialize)]
pub struct ComposeBody {
    pub compose: String,
}

/// Lifecycle action request
#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub action: ComposeAction,
}

/// Outcome of a lifecycle action
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub name: String,
    pub action: ComposeAction,
    pub stdout: String,
    pub stderr: String,
}

/// Removal options
#[derive(Debug, Default, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub delete_images: bool,

    #[serde(default)]
    pub delete_volumes: bool,
}

/// API Error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message
        });

        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::UnsafeUrl(_) | Error::InvalidSource(_) | Error::InvalidAppName(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::SourceNotFound(_)
            | Error::ApplicationNotFound(_)
            | Error::DeploymentNotFound(_) => StatusCode::NOT_FOUND,
            Error::DuplicateSource(_) | Error::VersionShadowed(_) => StatusCode::CONFLICT,
            Error::SizeLimitExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::ZipSlipDetected(_)
            | Error::NoAppsFolderFound
            | Error::Archive(_)
            | Error::CatalogParse(_)
            | Error::Yaml(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Network(_) => StatusCode::BAD_GATEWAY,
            Error::CommandTimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::CommandFailed(_) | Error::FileSystem(_) | Error::Json(_) | Error::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            error!("Request failed: {}", err);
        }

        ApiError {
            status,
            message: err.to_string(),
        }
    }
}

/// Health check
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "dockyard-api"
    }))
}

pub async fn list_sources_handler(State(state): State<Arc<AppState>>) -> Json<Vec<Source>> {
    Json(state.catalog.list_sources().await)
}

/// Register and immediately process a source
///
/// Answers 201 with the stored record even when the first fetch failed;
/// the record then carries `status: error`.
pub async fn add_source_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AddSourceRequest>,
) -> Result<(StatusCode, Json<Source>), ApiError> {
    info!("Adding source: {}", payload.url);

    let source = state
        .catalog
        .add_source(payload.url, payload.variant)
        .await?;

    Ok((StatusCode::CREATED, Json(source)))
}

pub async fn delete_source_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.catalog.remove_source(&id).await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "id": id
    })))
}

pub async fn refresh_source_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Source>, ApiError> {
    info!("Refreshing source: {}", id);
    Ok(Json(state.catalog.refresh_source(&id).await?))
}

pub async fn list_apps_handler(State(state): State<Arc<AppState>>) -> Json<Vec<Application>> {
    Json(state.catalog.list_applications().await)
}

pub async fn get_app_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Application>, ApiError> {
    Ok(Json(state.catalog.get_application(&id).await?))
}

/// Compose text of a catalog app
pub async fn get_app_compose_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ComposeBody>, ApiError> {
    let app = state.catalog.get_application(&id).await?;
    let compose = state.catalog.resolve_compose(&app).await?;
    Ok(Json(ComposeBody { compose }))
}

/// TrueNAS chart values for a catalog app
pub async fn get_app_truenas_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let app = state.catalog.get_application(&id).await?;
    let compose = state.catalog.resolve_compose(&app).await?;

    Ok(Json(serde_json::json!({
        "id": app.id,
        "values": generate_truenas_values(&compose)
    })))
}

/// Install a catalog app as a new deployment version
pub async fn install_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<InstallRequest>,
) -> Result<(StatusCode, Json<Deployment>), ApiError> {
    if state.catalog.settings().get().await.disable_save_to_server {
        return Err(ApiError {
            status: StatusCode::FORBIDDEN,
            message: "Saving to the server is disabled".to_string(),
        });
    }

    let app = state.catalog.get_application(&payload.app).await?;
    let compose = state.catalog.resolve_compose(&app).await?;
    let deployment = state.controller.store().install(&app, &compose).await?;

    info!("Installed {} as {}", app.id, deployment.app_name);
    Ok((StatusCode::CREATED, Json(deployment)))
}

pub async fn list_installed_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<InstalledApp>>, ApiError> {
    Ok(Json(state.controller.store().list_installed()?))
}

pub async fn get_installed_compose_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ComposeBody>, ApiError> {
    let compose = state.controller.store().read_compose(&name).await?;
    Ok(Json(ComposeBody { compose }))
}

pub async fn put_installed_compose_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(payload): Json<ComposeBody>,
) -> Result<Json<Deployment>, ApiError> {
    let deployment = state
        .controller
        .store()
        .write_compose(&name, &payload.compose)
        .await?;
    Ok(Json(deployment))
}

pub async fn action_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(payload): Json<ActionRequest>,
) -> Result<Json<ActionResponse>, ApiError> {
    let output = state.controller.apply(&name, payload.action).await?;

    Ok(Json(ActionResponse {
        name,
        action: payload.action,
        stdout: output.stdout,
        stderr: output.stderr,
    }))
}

pub async fn delete_installed_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(payload): Json<DeleteRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    info!(
        "Removing {} (images: {}, volumes: {})",
        name, payload.delete_images, payload.delete_volumes
    );

    state
        .controller
        .remove(&name, payload.delete_images, payload.delete_volumes)
        .await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "name": name
    })))
}

pub async fn get_settings_handler(State(state): State<Arc<AppState>>) -> Json<Settings> {
    Json(state.catalog.settings().get().await)
}

pub async fn save_settings_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Settings>,
) -> Result<Json<Settings>, ApiError> {
    Ok(Json(state.catalog.settings().save(payload).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (Error::UnsafeUrl("x".into()), StatusCode::BAD_REQUEST),
            (Error::InvalidAppName(String::new()), StatusCode::BAD_REQUEST),
            (Error::SourceNotFound("x".into()), StatusCode::NOT_FOUND),
            (Error::DeploymentNotFound("x".into()), StatusCode::NOT_FOUND),
            (Error::DuplicateSource("x".into()), StatusCode::CONFLICT),
            (Error::VersionShadowed("x".into()), StatusCode::CONFLICT),
            (
                Error::SizeLimitExceeded { limit: 1 },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (Error::NoAppsFolderFound, StatusCode::UNPROCESSABLE_ENTITY),
            (Error::Network("x".into()), StatusCode::BAD_GATEWAY),
            (Error::CommandFailed("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (Error::CommandTimedOut(300), StatusCode::GATEWAY_TIMEOUT),
        ];

        for (err, status) in cases {
            let message = err.to_string();
            let api: ApiError = err.into();
            assert_eq!(api.status, status, "{}", message);
            assert_eq!(api.message, message);
        }
    }
}
