use axum::http::{header, HeaderValue, Method};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    download_service, get_service, get_status, get_system_info, health, install_service,
    list_installed, list_running, list_services, start_all, start_service, stop_all,
    stop_service, stream_events, update_port,
};
use super::middleware::auth_middleware;
use super::state::AppState;

/// 根据配置的来源列表构建 CorsLayer
fn build_cors_layer(cors_origins: Vec<String>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .allow_credentials(true);

    if cors_origins.is_empty() {
        tracing::debug!("SY_CORS_ORIGINS not configured, allowing all origins");
        base.allow_origin(AllowOrigin::any())
            .allow_credentials(false) // any() 不能与 credentials(true) 共用
    } else {
        let origins: Vec<HeaderValue> = cors_origins
            .into_iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        base.allow_origin(origins)
    }
}

/// Build the router with routes and middleware wired.
pub fn app_router(state: AppState, cors_origins: Vec<String>) -> Router {
    let public_routes = Router::new().route("/health", get(health));

    let service_routes = Router::new()
        .route("/services", get(list_services))
        .route("/services/installed", get(list_installed))
        .route("/services/running", get(list_running))
        .route("/services/:name", get(get_service))
        .route("/services/:name/status", get(get_status))
        .route("/services/:name/start", post(start_service))
        .route("/services/:name/stop", post(stop_service))
        .route("/services/:name/port", put(update_port))
        .route("/services/:name/download", post(download_service))
        .route("/services/:name/install", post(install_service));

    let action_routes = Router::new()
        .route("/actions/start-all", post(start_all))
        .route("/actions/stop-all", post(stop_all))
        .route("/system", get(get_system_info))
        .route("/events", get(stream_events));

    Router::new()
        .merge(public_routes)
        .merge(service_routes)
        .merge(action_routes)
        .layer(from_fn_with_state(state.clone(), auth_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(cors_origins))
        .with_state(state)
}
