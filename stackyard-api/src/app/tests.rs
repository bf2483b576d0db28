use super::{app_router, AppState};
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use stackyard_core::{
    InstallationCoordinator, Paths, PostInstallHooks, ServiceDefinition, ServiceRegistry,
    ServiceSupervisor, SupervisorConfig,
};
use tempfile::TempDir;
use tower::ServiceExt;

const TOKEN: &str = "test-token";

async fn test_app(dir: &TempDir, defs: Vec<ServiceDefinition>, token: Option<&str>) -> Router {
    let registry = ServiceRegistry::open_with_defaults(Paths::new(dir.path()), defs)
        .await
        .unwrap();
    let supervisor = ServiceSupervisor::new(registry, SupervisorConfig::default())
        .with_hooks(PostInstallHooks::empty());
    let installer = InstallationCoordinator::new(&supervisor);
    let state = AppState {
        supervisor,
        installer,
        token: token.map(str::to_string),
    };
    app_router(state, Vec::new())
}

fn request(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"));
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn service(name: &str) -> ServiceDefinition {
    ServiceDefinition::new(name, format!("stackyard-api-test-{name}"))
}

#[tokio::test]
async fn health_ok_without_auth() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir, vec![], Some(TOKEN)).await;
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn token_guards_everything_else() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir, vec![service("web")], Some(TOKEN)).await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/services").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["code"], "Unauthorized");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/services")
                .header(header::AUTHORIZATION, "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(request("GET", "/services", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let list = json_body(response).await;
    assert_eq!(list[0]["name"], "web");

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/system?token={TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn no_token_configured_means_open() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir, vec![service("web")], None).await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/services/web/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status = json_body(response).await;
    assert_eq!(status["state"], "stopped");
}

#[tokio::test]
async fn service_errors_map_to_status_codes() {
    let dir = TempDir::new().unwrap();
    let mut disabled = service("off");
    disabled.enabled = false;
    disabled.installed = true;
    let app = test_app(&dir, vec![service("web"), disabled], Some(TOKEN)).await;

    let response = app
        .clone()
        .oneshot(request("GET", "/services/missing", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["code"], "NotFound");

    let response = app
        .clone()
        .oneshot(request("POST", "/services/web/start", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["code"], "NotInstalled");

    let response = app
        .oneshot(request("POST", "/services/off/start", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["code"], "Disabled");
}

#[tokio::test]
async fn start_reports_running_when_port_already_served() {
    let dir = TempDir::new().unwrap();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let mut def = service("ext");
    def.installed = true;
    def.port = Some(port);
    let app = test_app(&dir, vec![def], Some(TOKEN)).await;

    let response = app
        .clone()
        .oneshot(request("POST", "/services/ext/start", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status = json_body(response).await;
    assert_eq!(status["state"], "running");
    assert_eq!(status["port"], port);

    let response = app
        .oneshot(request("GET", "/services/ext", None))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["definition"]["name"], "ext");
    assert_eq!(body["status"]["state"], "running");
}

#[tokio::test]
async fn update_port_persists_for_stopped_service() {
    let dir = TempDir::new().unwrap();
    let mut def = service("cache");
    def.installed = true;
    def.port = Some(free_port());
    let new_port = free_port();
    let app = test_app(&dir, vec![def], Some(TOKEN)).await;

    let response = app
        .clone()
        .oneshot(request(
            "PUT",
            "/services/cache/port",
            Some(serde_json::json!({ "port": 0 })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(request(
            "PUT",
            "/services/cache/port",
            Some(serde_json::json!({ "port": new_port })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["success"], true);

    let response = app
        .oneshot(request("GET", "/services/cache", None))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["definition"]["port"], new_port);
}

#[tokio::test]
async fn install_with_missing_artifact_is_a_failed_result() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir, vec![service("db")], Some(TOKEN)).await;

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/services/db/install",
            Some(serde_json::json!({ "artifact_path": "db.zip" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let result = json_body(response).await;
    assert_eq!(result["success"], false);

    let response = app
        .oneshot(request("GET", "/services/installed", None))
        .await
        .unwrap();
    assert_eq!(json_body(response).await, serde_json::json!([]));
}

#[tokio::test]
async fn bulk_actions_return_no_content() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir, vec![service("web")], Some(TOKEN)).await;
    for uri in ["/actions/start-all", "/actions/stop-all"] {
        let response = app.clone().oneshot(request("POST", uri, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
    let response = app
        .oneshot(request("GET", "/services/running", None))
        .await
        .unwrap();
    assert_eq!(json_body(response).await, serde_json::json!([]));
}
