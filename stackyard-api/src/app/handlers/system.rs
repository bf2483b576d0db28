use axum::extract::State;
use axum::Json;
use stackyard_core::SystemInfo;
use tracing::instrument;

use crate::app::{ApiError, AppState};

#[instrument(skip_all)]
pub async fn get_system_info(State(state): State<AppState>) -> Result<Json<SystemInfo>, ApiError> {
    Ok(Json(state.supervisor.system_info().await?))
}
