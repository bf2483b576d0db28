use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request};
use axum::middleware::Next;
use axum::response::Response;

use crate::app::{ApiError, AppState};

const PUBLIC_PATHS: &[&str] = &["/health"];

/// 从 Authorization header 或 `?token=` 中提取 token
fn extract_token(request: &Request<Body>) -> Option<String> {
    if let Some(token) = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(token.trim().to_string());
    }

    // fallback 到 query param（WebSocket 场景，浏览器无法设置 header）
    request.uri().query().and_then(|query| {
        query.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == "token").then(|| value.to_string())
        })
    })
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let path = request.uri().path();
    if PUBLIC_PATHS.iter().any(|p| path == *p) {
        return Ok(next.run(request).await);
    }

    match extract_token(&request) {
        Some(token) if token == expected => Ok(next.run(request).await),
        _ => {
            tracing::warn!(path = %path, "rejected request with missing or bad token");
            Err(ApiError::unauthorized())
        }
    }
}
