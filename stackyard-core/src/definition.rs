use crate::config::Paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 服务类型，仅用于展示
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Web,
    Database,
    Cache,
    #[default]
    Other,
}

/// Static configuration of one manageable service.
///
/// Persisted as a flat record in `services.json`; the `name` is the key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceDefinition {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub kind: ServiceKind,
    /// Bare name or path; resolved at spawn time (see [`ServiceDefinition::resolve_executable`]).
    pub executable: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub config_path: Option<PathBuf>,
    #[serde(default)]
    pub data_path: Option<PathBuf>,
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub installed: bool,
    /// Set by a successful installation.
    #[serde(default)]
    pub install_dir: Option<PathBuf>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl ServiceDefinition {
    pub fn new(name: impl Into<String>, executable: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            description: String::new(),
            kind: ServiceKind::Other,
            executable: executable.into(),
            args: Vec::new(),
            port: None,
            config_path: None,
            data_path: None,
            log_path: None,
            auto_start: false,
            enabled: true,
            installed: false,
            install_dir: None,
            download_url: None,
            version: None,
        }
    }

    /// File name of the executable, used for name-based kills.
    pub fn executable_name(&self) -> String {
        Path::new(&self.executable)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.executable.clone())
    }

    /// Search order: install dir (and its `bin/`), user bin dir,
    /// app-relative bin dir, then `PATH`.
    pub fn resolve_executable(&self, paths: &Paths) -> Option<PathBuf> {
        let exe = Path::new(&self.executable);
        if exe.is_absolute() {
            return exe.is_file().then(|| exe.to_path_buf());
        }

        let file_name = self.executable_name();
        let mut candidates = Vec::new();
        if let Some(dir) = &self.install_dir {
            candidates.push(dir.join(&self.executable));
            candidates.push(dir.join("bin").join(&file_name));
        }
        candidates.push(paths.bin_dir().join(&file_name));
        if let Some(app_bin) = paths.app_bin_dir() {
            candidates.push(app_bin.join(&file_name));
        }

        candidates
            .into_iter()
            .find(|p| p.is_file())
            .or_else(|| which::which(&self.executable).ok())
    }

    /// Directories that must exist before the first start.
    pub fn directories(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(parent) = self.config_path.as_deref().and_then(Path::parent) {
            if !parent.as_os_str().is_empty() {
                dirs.push(parent.to_path_buf());
            }
        }
        dirs.extend(self.data_path.iter().cloned());
        dirs.extend(self.log_path.iter().cloned());
        dirs
    }
}

fn platform_exe(base: &str) -> String {
    if cfg!(windows) {
        format!("{base}.exe")
    } else {
        base.to_string()
    }
}

/// Built-in services seeded into a fresh registry.
pub fn default_definitions(paths: &Paths) -> Vec<ServiceDefinition> {
    let root = paths.root();
    let mut apache = ServiceDefinition::new("apache", platform_exe("httpd"));
    apache.display_name = "Apache".into();
    apache.description = "Apache HTTP Server".into();
    apache.kind = ServiceKind::Web;
    apache.port = Some(8080);
    apache.config_path = Some(root.join("apache").join("conf").join("httpd.conf"));
    apache.auto_start = true;
    apache.version = Some("2.4.65".into());

    let mut nginx = ServiceDefinition::new("nginx", platform_exe("nginx"));
    nginx.display_name = "Nginx".into();
    nginx.description = "Nginx Web Server".into();
    nginx.kind = ServiceKind::Web;
    nginx.port = Some(80);
    nginx.config_path = Some(root.join("nginx").join("nginx.conf"));
    nginx.version = Some("1.24.0".into());

    let mut mysql = ServiceDefinition::new("mysql", platform_exe("mysqld"));
    mysql.display_name = "MySQL".into();
    mysql.description = "MySQL Database Server".into();
    mysql.kind = ServiceKind::Database;
    mysql.port = Some(3306);
    mysql.data_path = Some(root.join("mysql").join("data"));
    mysql.log_path = Some(root.join("mysql").join("logs"));
    mysql.auto_start = true;
    mysql.version = Some("8.0.35".into());

    let mut mariadb = ServiceDefinition::new("mariadb", platform_exe("mariadbd"));
    mariadb.display_name = "MariaDB".into();
    mariadb.description = "MariaDB Database Server".into();
    mariadb.kind = ServiceKind::Database;
    mariadb.port = Some(3306);
    mariadb.data_path = Some(root.join("mariadb").join("data"));
    mariadb.log_path = Some(root.join("mariadb").join("logs"));

    let mut postgres = ServiceDefinition::new("postgresql", platform_exe("postgres"));
    postgres.display_name = "PostgreSQL".into();
    postgres.description = "PostgreSQL Database Server".into();
    postgres.kind = ServiceKind::Database;
    postgres.port = Some(5432);
    postgres.data_path = Some(root.join("postgresql").join("data"));
    postgres.log_path = Some(root.join("postgresql").join("logs"));

    let mut redis = ServiceDefinition::new("redis", platform_exe("redis-server"));
    redis.display_name = "Redis".into();
    redis.description = "Redis Cache Server".into();
    redis.kind = ServiceKind::Cache;
    redis.port = Some(6379);
    redis.config_path = Some(root.join("redis").join("redis.conf"));
    redis.version = Some("7.2.4".into());

    let mut memcached = ServiceDefinition::new("memcached", platform_exe("memcached"));
    memcached.display_name = "Memcached".into();
    memcached.description = "Memcached Cache Server".into();
    memcached.kind = ServiceKind::Cache;
    memcached.port = Some(11211);

    vec![apache, nginx, mysql, mariadb, postgres, redis, memcached]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn record_without_optional_fields_is_enabled() {
        let def: ServiceDefinition =
            serde_json::from_str(r#"{"name":"x","executable":"x-bin"}"#).unwrap();
        assert!(def.enabled);
        assert!(!def.installed);
        assert_eq!(def.kind, ServiceKind::Other);
    }

    #[test]
    fn install_dir_wins_over_user_bin() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::new(dir.path().join("home"));
        let install = dir.path().join("install");
        std::fs::create_dir_all(install.join("bin")).unwrap();
        std::fs::create_dir_all(paths.bin_dir()).unwrap();
        std::fs::write(install.join("bin").join("svc-zz"), b"").unwrap();
        std::fs::write(paths.bin_dir().join("svc-zz"), b"").unwrap();

        let mut def = ServiceDefinition::new("svc", "svc-zz");
        assert_eq!(
            def.resolve_executable(&paths),
            Some(paths.bin_dir().join("svc-zz"))
        );
        def.install_dir = Some(install.clone());
        assert_eq!(
            def.resolve_executable(&paths),
            Some(install.join("bin").join("svc-zz"))
        );
    }

    #[test]
    fn unknown_executable_does_not_resolve() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::new(dir.path());
        let def = ServiceDefinition::new("ghost", "stackyard-no-such-binary-4711");
        assert!(def.resolve_executable(&paths).is_none());
    }

    #[test]
    fn directories_cover_config_parent_data_and_logs() {
        let mut def = ServiceDefinition::new("db", "db");
        def.config_path = Some(PathBuf::from("/tmp/sy/db/conf/db.conf"));
        def.data_path = Some(PathBuf::from("/tmp/sy/db/data"));
        def.log_path = Some(PathBuf::from("/tmp/sy/db/logs"));
        assert_eq!(
            def.directories(),
            vec![
                PathBuf::from("/tmp/sy/db/conf"),
                PathBuf::from("/tmp/sy/db/data"),
                PathBuf::from("/tmp/sy/db/logs"),
            ]
        );
    }
}
