//! Installation pipeline: download, unpack, post-install hooks, mark installed.

use crate::config::SupervisorConfig;
use crate::definition::ServiceDefinition;
use crate::error::{Result, ServiceError};
use crate::events::{EventBus, ServiceEvent};
use crate::models::{DownloadProgress, OperationResult};
use crate::registry::ServiceRegistry;
use crate::supervisor::ServiceSupervisor;
use std::path::Path;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

mod download;
mod extract;
mod hooks;

pub use hooks::{
    rewrite_httpd_conf, rewrite_httpd_listen, DirectivePort, FirewallRule, HttpdConfig,
    InstallContext, LinkExecutable, PostInstallHook, PostInstallHooks,
};

/// 下载 → 解压/安装 → post-install hooks → 标记 installed。
#[derive(Debug, Clone)]
pub struct InstallationCoordinator {
    registry: ServiceRegistry,
    config: SupervisorConfig,
    events: EventBus,
    hooks: Arc<PostInstallHooks>,
    client: reqwest::Client,
}

impl InstallationCoordinator {
    /// Share the supervisor's registry, event bus and hooks.
    pub fn new(supervisor: &ServiceSupervisor) -> Self {
        Self {
            registry: supervisor.registry().clone(),
            config: supervisor.config().clone(),
            events: supervisor.event_bus().clone(),
            hooks: Arc::new(supervisor.hooks().clone()),
            client: reqwest::Client::new(),
        }
    }

    /// Install from `artifact` (relative paths resolve against the downloads dir).
    #[instrument(skip(self, artifact))]
    pub async fn install(&self, name: &str, artifact: &Path) -> Result<OperationResult> {
        let def = self.registry.get(name).await?;
        if def.installed {
            return Ok(OperationResult::ok(format!("{name} is already installed")));
        }

        let artifact = if artifact.is_absolute() {
            artifact.to_path_buf()
        } else {
            self.registry.paths().downloads_dir().join(artifact)
        };
        if !tokio::fs::try_exists(&artifact).await.unwrap_or(false) {
            return Ok(OperationResult::failed(format!(
                "artifact not found: {}",
                artifact.display()
            )));
        }

        info!(service = %name, artifact = %artifact.display(), "installing");
        match timeout(self.config.install_timeout, self.install_artifact(&def, &artifact)).await {
            Ok(Ok(def)) => {
                let dir = def
                    .install_dir
                    .as_ref()
                    .map(|d| d.display().to_string())
                    .unwrap_or_default();
                info!(service = %name, install_dir = %dir, "installed");
                Ok(OperationResult::ok(format!("{name} installed to {dir}")))
            }
            Ok(Err(e)) => {
                warn!(service = %name, error = %e, "install failed");
                Ok(OperationResult::failed(e.to_string()))
            }
            Err(_) => {
                let e = ServiceError::Timeout(format!("install of {name}"));
                warn!(service = %name, error = %e, "install failed");
                Ok(OperationResult::failed(e.to_string()))
            }
        }
    }

    async fn install_artifact(
        &self,
        def: &ServiceDefinition,
        artifact: &Path,
    ) -> Result<ServiceDefinition> {
        let paths = self.registry.paths().clone();
        let target = paths.service_dir(&def.name);
        extract::unpack(artifact, &target).await?;

        let exe_name = def.executable_name();
        let search_root = target.clone();
        let found = tokio::task::spawn_blocking(move || {
            extract::find_executable(&search_root, &exe_name)
        })
        .await
        .map_err(|e| ServiceError::Other(format!("spawn_blocking failed: {}", e)))?;
        let executable = found.or_else(|| def.resolve_executable(&paths));
        debug!(service = %def.name, executable = ?executable, "executable located");

        let install_dir = executable
            .as_deref()
            .filter(|exe| exe.starts_with(&target))
            .and_then(extract::install_root)
            .unwrap_or(target);

        let mut ctx = InstallContext {
            def: def.clone(),
            paths,
            install_dir,
            executable,
        };
        self.hooks.after_install(&mut ctx).await;

        self.registry
            .update(&def.name, |d| {
                d.installed = true;
                d.install_dir = Some(ctx.install_dir.clone());
                if ctx.def.config_path.is_some() {
                    d.config_path = ctx.def.config_path.clone();
                }
            })
            .await
    }
}
