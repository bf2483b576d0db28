mod app;

use app::{app_router, AppState};
use dotenvy::dotenv;
use stackyard_core::{
    InstallationCoordinator, Paths, PostInstallHooks, ServiceRegistry, ServiceSupervisor,
    SupervisorConfig,
};
use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone)]
struct ApiConfig {
    bind: SocketAddr,
    paths: Paths,
    /// Bearer token；未设置则不做认证
    token: Option<String>,
    /// CORS 允许的来源列表（空则允许所有）
    cors_origins: Vec<String>,
    supervisor: SupervisorConfig,
    autostart: bool,
}

impl ApiConfig {
    fn from_env() -> Self {
        let bind = env::var("SY_BIND")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 7878)));

        let token = env::var("SY_TOKEN")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        // 逗号分隔；空或 "*" 表示允许所有
        let cors_origins = env::var("SY_CORS_ORIGINS")
            .ok()
            .map(|s| {
                let trimmed = s.trim();
                if trimmed.is_empty() || trimmed == "*" {
                    vec![]
                } else {
                    trimmed
                        .split(',')
                        .filter(|t| !t.trim().is_empty())
                        .map(|t| t.trim().to_string())
                        .collect()
                }
            })
            .unwrap_or_default();

        let mut supervisor = SupervisorConfig::default();
        if let Some(ms) = env_millis("SY_STOP_GRACE_MS") {
            supervisor.stop_grace = ms;
        }
        if let Some(ms) = env_millis("SY_START_CONFIRM_MS") {
            supervisor.start_confirm = ms;
        }

        let autostart = env::var("SY_NO_AUTOSTART")
            .map(|v| matches!(v.trim(), "" | "0" | "false"))
            .unwrap_or(true);

        Self {
            bind,
            paths: Paths::from_env(),
            token,
            cors_origins,
            supervisor,
            autostart,
        }
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 优先读取 .env（若存在）
    let _ = dotenv();
    init_tracing();

    let config = ApiConfig::from_env();
    info!(home = %config.paths.root().display(), "starting API on {}", config.bind);

    let registry = ServiceRegistry::open(config.paths.clone()).await?;
    let supervisor = ServiceSupervisor::new(registry, config.supervisor.clone())
        .with_hooks(PostInstallHooks::defaults());
    let installer = InstallationCoordinator::new(&supervisor);

    if config.autostart {
        supervisor.start_all().await;
    } else {
        info!("SY_NO_AUTOSTART set, skipping auto start");
    }

    let state = AppState {
        supervisor: supervisor.clone(),
        installer,
        token: config.token.clone(),
    };

    let app = app_router(state, config.cors_origins.clone());
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("stopping all services");
    supervisor.stop_all().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

fn init_tracing() {
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
