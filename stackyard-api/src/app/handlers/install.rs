use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use stackyard_core::OperationResult;
use std::path::PathBuf;
use tracing::instrument;

use crate::app::{ApiError, AppState};

#[instrument(skip_all, fields(service = %name))]
pub async fn download_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<OperationResult>, ApiError> {
    Ok(Json(state.installer.download(&name).await?))
}

#[derive(Debug, Deserialize)]
pub struct InstallRequest {
    /// 绝对路径，或相对于 downloads 目录
    pub artifact_path: PathBuf,
}

#[instrument(skip_all, fields(service = %name))]
pub async fn install_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<InstallRequest>,
) -> Result<Json<OperationResult>, ApiError> {
    if payload.artifact_path.as_os_str().is_empty() {
        return Err(ApiError::bad_request("artifact_path is required"));
    }
    Ok(Json(
        state
            .installer
            .install(&name, &payload.artifact_path)
            .await?,
    ))
}
