use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use stackyard_core::ServiceError;

#[derive(Debug)]
pub struct ApiError {
    code: &'static str,
    message: String,
    status: StatusCode,
}

impl ApiError {
    pub fn new(code: &'static str, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new("Unauthorized", StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BadRequest", StatusCode::BAD_REQUEST, message)
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        let (code, status) = match err {
            ServiceError::NotFound(_) => ("NotFound", StatusCode::NOT_FOUND),
            ServiceError::Disabled(_) => ("Disabled", StatusCode::CONFLICT),
            ServiceError::NotInstalled(_) => ("NotInstalled", StatusCode::CONFLICT),
            ServiceError::Timeout(_) => ("Timeout", StatusCode::GATEWAY_TIMEOUT),
            ServiceError::AlreadyRunning(_) => ("AlreadyRunning", StatusCode::INTERNAL_SERVER_ERROR),
            ServiceError::SpawnFailed(_) => ("SpawnFailed", StatusCode::INTERNAL_SERVER_ERROR),
            ServiceError::OrphanedPort { .. } => ("OrphanedPort", StatusCode::INTERNAL_SERVER_ERROR),
            ServiceError::ForceKillFailed(_) => {
                ("ForceKillFailed", StatusCode::INTERNAL_SERVER_ERROR)
            }
            ServiceError::Download(_) => ("DownloadFailed", StatusCode::INTERNAL_SERVER_ERROR),
            ServiceError::Install(_) => ("InstallFailed", StatusCode::INTERNAL_SERVER_ERROR),
            ServiceError::Io(_) => ("IoError", StatusCode::INTERNAL_SERVER_ERROR),
            ServiceError::Serde(_) => ("SerdeError", StatusCode::INTERNAL_SERVER_ERROR),
            ServiceError::Other(_) => ("Error", StatusCode::INTERNAL_SERVER_ERROR),
        };
        ApiError::new(code, status, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "code": self.code,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}
