//! Timing knobs and on-disk layout.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Timeouts and cache windows used by the supervisor and the installer.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How long a SIGTERM'd process gets before it is force-killed.
    pub stop_grace: Duration,
    /// How long to wait for the process to disappear after a forced kill.
    pub kill_wait: Duration,
    /// Window after spawn during which the process must stay alive
    /// (and, if it declares one, should bind its port).
    pub start_confirm: Duration,
    /// Interval used while polling during the confirmation window.
    pub start_poll: Duration,
    /// A cached `running` status younger than this is returned without probing.
    pub status_freshness: Duration,
    pub port_cache_ttl: Duration,
    pub port_probe_timeout: Duration,
    pub download_timeout: Duration,
    pub install_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(3),
            kill_wait: Duration::from_secs(2),
            start_confirm: Duration::from_secs(2),
            start_poll: Duration::from_millis(250),
            status_freshness: Duration::from_secs(5),
            port_cache_ttl: Duration::from_secs(5),
            port_probe_timeout: Duration::from_millis(300),
            download_timeout: Duration::from_secs(5 * 60),
            install_timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// Directory layout rooted at the stackyard home (`~/.stackyard` by default).
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// `SY_HOME` if set, otherwise `<home>/.stackyard`.
    pub fn from_env() -> Self {
        if let Some(root) = std::env::var_os("SY_HOME").filter(|v| !v.is_empty()) {
            return Self::new(root);
        }
        let home = dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(home.join(".stackyard"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persisted service definitions.
    pub fn registry_file(&self) -> PathBuf {
        self.root.join("services.json")
    }

    /// User bin dir: executables copied here after install.
    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join("downloads")
    }

    /// Extraction target for a service's archive.
    pub fn service_dir(&self, name: &str) -> PathBuf {
        self.root.join("services").join(name)
    }

    /// Fallback location for captured process output.
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// `bin/` next to the running executable, if it can be determined.
    pub fn app_bin_dir(&self) -> Option<PathBuf> {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("bin")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timings() {
        let config = SupervisorConfig::default();
        assert_eq!(config.stop_grace, Duration::from_secs(3));
        assert_eq!(config.kill_wait, Duration::from_secs(2));
        assert_eq!(config.start_confirm, Duration::from_secs(2));
        assert_eq!(config.start_poll, Duration::from_millis(250));
        assert_eq!(config.status_freshness, Duration::from_secs(5));
        assert_eq!(config.port_cache_ttl, Duration::from_secs(5));
        assert_eq!(config.port_probe_timeout, Duration::from_millis(300));
        assert_eq!(config.download_timeout, Duration::from_secs(300));
        assert_eq!(config.install_timeout, Duration::from_secs(300));
    }

    #[test]
    fn layout_under_root() {
        let paths = Paths::new("/srv/sy");
        assert_eq!(paths.registry_file(), PathBuf::from("/srv/sy/services.json"));
        assert_eq!(paths.service_dir("redis"), PathBuf::from("/srv/sy/services/redis"));
        assert_eq!(paths.bin_dir(), PathBuf::from("/srv/sy/bin"));
    }
}
