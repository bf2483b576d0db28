//! Persistent set of service definitions.

use crate::config::Paths;
use crate::definition::{default_definitions, ServiceDefinition};
use crate::error::{Result, ServiceError};
use fs2::FileExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// 服务定义注册表：内存中保持顺序，每次变更整体落盘到 services.json。
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    paths: Paths,
    services: Arc<Mutex<Vec<ServiceDefinition>>>,
}

impl ServiceRegistry {
    /// Load `services.json`, seeding the built-in definitions on first use.
    pub async fn open(paths: Paths) -> Result<Self> {
        let defaults = default_definitions(&paths);
        Self::open_with_defaults(paths, defaults).await
    }

    pub async fn open_with_defaults(
        paths: Paths,
        defaults: Vec<ServiceDefinition>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(paths.root()).await?;
        let file = paths.registry_file();
        let services = if tokio::fs::try_exists(&file).await.unwrap_or(false) {
            let data = tokio::fs::read(&file).await?;
            let loaded: Vec<ServiceDefinition> = serde_json::from_slice(&data)?;
            debug!(count = loaded.len(), path = %file.display(), "loaded service registry");
            loaded
        } else {
            info!(count = defaults.len(), path = %file.display(), "seeding service registry");
            write_registry(file, defaults.clone()).await?;
            defaults
        };

        Ok(Self {
            paths,
            services: Arc::new(Mutex::new(services)),
        })
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub async fn get(&self, name: &str) -> Result<ServiceDefinition> {
        self.services
            .lock()
            .await
            .iter()
            .find(|s| s.name == name)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(name.to_string()))
    }

    pub async fn all(&self) -> Vec<ServiceDefinition> {
        self.services.lock().await.clone()
    }

    /// Mutate one definition in place and persist the whole set.
    #[instrument(skip(self, f))]
    pub async fn update<F>(&self, name: &str, f: F) -> Result<ServiceDefinition>
    where
        F: FnOnce(&mut ServiceDefinition),
    {
        let mut services = self.services.lock().await;
        let def = services
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| ServiceError::NotFound(name.to_string()))?;
        f(def);
        let updated = def.clone();
        write_registry(self.paths.registry_file(), services.clone()).await?;
        Ok(updated)
    }

    /// Live installed check: stored flag, or an executable that resolves.
    pub fn is_installed(&self, def: &ServiceDefinition) -> bool {
        def.installed || def.resolve_executable(&self.paths).is_some()
    }

    /// Recompute `installed` for every definition; persists only on change.
    ///
    /// 可执行文件查找（文件系统 + PATH）放在 blocking 线程里，不持有注册表锁。
    pub async fn refresh_installed(&self) -> Result<Vec<ServiceDefinition>> {
        let snapshot = self.all().await;
        let paths = self.paths.clone();
        let live: HashMap<String, bool> = tokio::task::spawn_blocking(move || {
            snapshot
                .into_iter()
                .map(|def| {
                    let installed = def.installed || def.resolve_executable(&paths).is_some();
                    (def.name, installed)
                })
                .collect()
        })
        .await
        .map_err(|e| ServiceError::Other(format!("spawn_blocking failed: {}", e)))?;

        let mut services = self.services.lock().await;
        let mut changed = false;
        for def in services.iter_mut() {
            let Some(&installed) = live.get(&def.name) else {
                continue;
            };
            if installed != def.installed {
                debug!(service = %def.name, installed, "installed flag changed");
                def.installed = installed;
                changed = true;
            }
        }
        if changed {
            write_registry(self.paths.registry_file(), services.clone()).await?;
        }
        Ok(services.clone())
    }
}

async fn write_registry(path: PathBuf, services: Vec<ServiceDefinition>) -> Result<()> {
    tokio::task::spawn_blocking(move || write_registry_blocking(&path, &services))
        .await
        .map_err(|e| ServiceError::Other(format!("spawn_blocking failed: {}", e)))?
}

/// temp 文件 + rename，期间持有 `<file>.lock` 上的排他锁。
fn write_registry_blocking(path: &Path, services: &[ServiceDefinition]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path.with_extension("json.lock"))?;
    lock_file.lock_exclusive()?;

    let tmp = path.with_extension("json.tmp");
    let data = serde_json::to_vec_pretty(services)?;
    let result = std::fs::write(&tmp, data).and_then(|_| std::fs::rename(&tmp, path));
    let _ = lock_file.unlock();
    result?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn defs() -> Vec<ServiceDefinition> {
        let mut web = ServiceDefinition::new("web", "stackyard-test-web");
        web.port = Some(18080);
        vec![web, ServiceDefinition::new("cache", "stackyard-test-cache")]
    }

    #[tokio::test]
    async fn seeds_builtin_defaults() {
        let dir = TempDir::new().unwrap();
        let registry = ServiceRegistry::open(Paths::new(dir.path())).await.unwrap();
        let names: Vec<_> = registry.all().await.into_iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec!["apache", "nginx", "mysql", "mariadb", "postgresql", "redis", "memcached"]
        );
        assert!(dir.path().join("services.json").exists());
    }

    #[tokio::test]
    async fn update_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::new(dir.path());
        let registry = ServiceRegistry::open_with_defaults(paths.clone(), defs())
            .await
            .unwrap();
        registry.update("web", |d| d.port = Some(19090)).await.unwrap();

        let reopened = ServiceRegistry::open_with_defaults(paths, vec![]).await.unwrap();
        assert_eq!(reopened.get("web").await.unwrap().port, Some(19090));
        assert_eq!(reopened.all().await.len(), 2);
    }

    #[tokio::test]
    async fn unknown_name_is_not_found() {
        let dir = TempDir::new().unwrap();
        let registry = ServiceRegistry::open_with_defaults(Paths::new(dir.path()), defs())
            .await
            .unwrap();
        let err = registry.get("missing").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        let err = registry.update("missing", |_| {}).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn refresh_installed_picks_up_user_bin() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::new(dir.path());
        let registry = ServiceRegistry::open_with_defaults(paths.clone(), defs())
            .await
            .unwrap();
        std::fs::create_dir_all(paths.bin_dir()).unwrap();
        std::fs::write(paths.bin_dir().join("stackyard-test-cache"), b"").unwrap();

        let all = registry.refresh_installed().await.unwrap();
        let cache = all.iter().find(|d| d.name == "cache").unwrap();
        let web = all.iter().find(|d| d.name == "web").unwrap();
        assert!(cache.installed);
        assert!(!web.installed);

        let raw = std::fs::read_to_string(paths.registry_file()).unwrap();
        assert!(raw.contains("\"installed\": true"));

        // 无变化时不落盘
        std::fs::remove_file(paths.registry_file()).unwrap();
        let again = registry.refresh_installed().await.unwrap();
        assert_eq!(again.len(), 2);
        assert!(!paths.registry_file().exists());
    }
}
