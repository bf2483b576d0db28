use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use stackyard_core::{OperationResult, ServiceDefinition, ServiceStatus};
use tracing::instrument;

use crate::app::{ApiError, AppState};

#[instrument(skip_all)]
pub async fn list_services(
    State(state): State<AppState>,
) -> Result<Json<Vec<ServiceDefinition>>, ApiError> {
    Ok(Json(state.supervisor.list().await?))
}

#[instrument(skip_all)]
pub async fn list_installed(
    State(state): State<AppState>,
) -> Result<Json<Vec<ServiceDefinition>>, ApiError> {
    Ok(Json(state.supervisor.installed().await?))
}

#[instrument(skip_all)]
pub async fn list_running(
    State(state): State<AppState>,
) -> Result<Json<Vec<ServiceDefinition>>, ApiError> {
    Ok(Json(state.supervisor.running().await?))
}

#[instrument(skip_all, fields(service = %name))]
pub async fn get_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let definition = state.supervisor.registry().get(&name).await?;
    let status = state.supervisor.status(&name).await?;
    Ok(Json(json!({
        "definition": definition,
        "status": status
    })))
}

#[instrument(skip_all, fields(service = %name))]
pub async fn get_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ServiceStatus>, ApiError> {
    Ok(Json(state.supervisor.status(&name).await?))
}

#[instrument(skip_all, fields(service = %name))]
pub async fn start_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ServiceStatus>, ApiError> {
    Ok(Json(state.supervisor.start(&name).await?))
}

#[instrument(skip_all, fields(service = %name))]
pub async fn stop_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ServiceStatus>, ApiError> {
    Ok(Json(state.supervisor.stop(&name).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdatePortRequest {
    pub port: u16,
}

#[instrument(skip_all, fields(service = %name))]
pub async fn update_port(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<UpdatePortRequest>,
) -> Result<Json<OperationResult>, ApiError> {
    if payload.port == 0 {
        return Err(ApiError::bad_request("port must be between 1 and 65535"));
    }
    Ok(Json(state.supervisor.update_port(&name, payload.port).await?))
}

#[instrument(skip_all)]
pub async fn start_all(State(state): State<AppState>) -> StatusCode {
    state.supervisor.start_all().await;
    StatusCode::NO_CONTENT
}

#[instrument(skip_all)]
pub async fn stop_all(State(state): State<AppState>) -> StatusCode {
    state.supervisor.stop_all().await;
    StatusCode::NO_CONTENT
}
