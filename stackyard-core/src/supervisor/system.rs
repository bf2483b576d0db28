//! 查询：服务列表与主机概览

use super::*;
use crate::models::SystemInfo;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind};

impl ServiceSupervisor {
    /// Every definition with a live `installed` flag.
    pub async fn list(&self) -> Result<Vec<ServiceDefinition>> {
        self.registry.refresh_installed().await
    }

    pub async fn installed(&self) -> Result<Vec<ServiceDefinition>> {
        Ok(self.list().await?.into_iter().filter(|d| d.installed).collect())
    }

    /// Definitions whose current status is `running`.
    pub async fn running(&self) -> Result<Vec<ServiceDefinition>> {
        let mut running = Vec::new();
        for def in self.registry.all().await {
            if self.status(&def.name).await?.state == ServiceState::Running {
                running.push(def);
            }
        }
        Ok(running)
    }

    pub async fn system_info(&self) -> Result<SystemInfo> {
        let defs = self.list().await?;
        let services_installed = defs.iter().filter(|d| d.installed).count();
        let services_running = self.running().await?.len();

        let system = self.system.clone();
        let (cpu_count, total_memory, used_memory) = tokio::task::spawn_blocking(move || {
            let mut sys = system.lock().unwrap_or_else(|e| e.into_inner());
            sys.refresh_specifics(
                RefreshKind::new()
                    .with_cpu(CpuRefreshKind::new())
                    .with_memory(MemoryRefreshKind::new().with_ram()),
            );
            (sys.cpus().len(), sys.total_memory(), sys.used_memory())
        })
        .await
        .map_err(|e| ServiceError::Other(format!("spawn_blocking failed: {}", e)))?;

        Ok(SystemInfo {
            os: System::name(),
            os_version: System::os_version(),
            hostname: System::host_name(),
            arch: std::env::consts::ARCH.to_string(),
            uptime_secs: System::uptime(),
            cpu_count,
            total_memory,
            used_memory,
            home: self.paths().root().display().to_string(),
            services_total: defs.len(),
            services_installed,
            services_running,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn running_filters_by_status_and_info_counts() {
        let dir = TempDir::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut up = ServiceDefinition::new("up", "stackyard-test-up");
        up.port = Some(listener.local_addr().unwrap().port());
        let mut down = ServiceDefinition::new("down", "stackyard-test-down");
        down.installed = true;
        let sup = supervisor_with(dir.path(), vec![up, down]).await;

        let running: Vec<_> = sup.running().await.unwrap().into_iter().map(|d| d.name).collect();
        assert_eq!(running, vec!["up"]);

        let installed: Vec<_> = sup.installed().await.unwrap().into_iter().map(|d| d.name).collect();
        assert_eq!(installed, vec!["down"]);

        let info = sup.system_info().await.unwrap();
        assert_eq!(info.services_total, 2);
        assert_eq!(info.services_running, 1);
        assert!(info.cpu_count > 0);
        assert!(info.total_memory > 0);
    }
}
