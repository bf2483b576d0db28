//! Per-service post-install strategies.

use crate::config::Paths;
use crate::definition::ServiceDefinition;
use crate::error::{Result, ServiceError};
use async_trait::async_trait;
use regex::{NoExpand, Regex};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// State handed to hooks after the artifact has been unpacked.
#[derive(Debug, Clone)]
pub struct InstallContext {
    pub def: ServiceDefinition,
    pub paths: Paths,
    pub install_dir: PathBuf,
    /// Resolved executable inside `install_dir`, if one was found.
    pub executable: Option<PathBuf>,
}

#[async_trait]
pub trait PostInstallHook: Send + Sync {
    fn name(&self) -> &'static str;

    async fn after_install(&self, ctx: &mut InstallContext) -> Result<()>;

    /// Called after the service's port was changed and persisted.
    async fn port_changed(&self, _def: &ServiceDefinition, _port: u16) -> Result<()> {
        Ok(())
    }
}

/// 通用 hook + 按服务名注册的 hook。
#[derive(Clone, Default)]
pub struct PostInstallHooks {
    common: Vec<Arc<dyn PostInstallHook>>,
    by_service: HashMap<String, Vec<Arc<dyn PostInstallHook>>>,
}

impl std::fmt::Debug for PostInstallHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = |hooks: &Vec<Arc<dyn PostInstallHook>>| {
            hooks.iter().map(|h| h.name()).collect::<Vec<_>>()
        };
        f.debug_struct("PostInstallHooks")
            .field("common", &names(&self.common))
            .field(
                "by_service",
                &self
                    .by_service
                    .iter()
                    .map(|(k, v)| (k.as_str(), names(v)))
                    .collect::<HashMap<_, _>>(),
            )
            .finish()
    }
}

impl PostInstallHooks {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in strategies for the default services.
    pub fn defaults() -> Self {
        let mut hooks = Self::empty();
        hooks.register_common(Arc::new(LinkExecutable));
        hooks.register("apache", Arc::new(HttpdConfig));
        hooks.register("apache", Arc::new(FirewallRule));
        hooks.register("redis", Arc::new(DirectivePort::redis()));
        hooks.register("nginx", Arc::new(DirectivePort::nginx()));
        hooks
    }

    pub fn register_common(&mut self, hook: Arc<dyn PostInstallHook>) {
        self.common.push(hook);
    }

    pub fn register(&mut self, service: &str, hook: Arc<dyn PostInstallHook>) {
        self.by_service
            .entry(service.to_string())
            .or_default()
            .push(hook);
    }

    fn hooks_for<'a>(&'a self, service: &str) -> impl Iterator<Item = &'a Arc<dyn PostInstallHook>> {
        self.common
            .iter()
            .chain(self.by_service.get(service).into_iter().flatten())
    }

    /// Run every hook for the service. Failures are logged and skipped.
    pub async fn after_install(&self, ctx: &mut InstallContext) {
        let service = ctx.def.name.clone();
        for hook in self.hooks_for(&service) {
            match hook.after_install(ctx).await {
                Ok(()) => debug!(service = %service, hook = hook.name(), "post-install hook done"),
                Err(e) => {
                    warn!(service = %service, hook = hook.name(), error = %e, "post-install hook failed")
                }
            }
        }
    }

    /// Let hooks rewrite config for a new port. The first failure is returned.
    pub async fn port_changed(&self, def: &ServiceDefinition, port: u16) -> Result<()> {
        for hook in self.hooks_for(&def.name) {
            hook.port_changed(def, port).await?;
            debug!(service = %def.name, hook = hook.name(), port, "port hook done");
        }
        Ok(())
    }
}

/// 把可执行文件复制到用户 bin 目录。
#[derive(Debug)]
pub struct LinkExecutable;

#[async_trait]
impl PostInstallHook for LinkExecutable {
    fn name(&self) -> &'static str {
        "link-executable"
    }

    async fn after_install(&self, ctx: &mut InstallContext) -> Result<()> {
        let Some(exe) = ctx.executable.clone() else {
            debug!(service = %ctx.def.name, "no executable to link");
            return Ok(());
        };
        let bin_dir = ctx.paths.bin_dir();
        tokio::fs::create_dir_all(&bin_dir).await?;
        let file_name = exe
            .file_name()
            .ok_or_else(|| ServiceError::Install(format!("bad executable path {}", exe.display())))?;
        let target = bin_dir.join(file_name);
        if target != exe {
            tokio::fs::copy(&exe, &target).await?;
            info!(service = %ctx.def.name, target = %target.display(), "executable linked");
        }
        Ok(())
    }
}

/// Apache `httpd.conf` relocation and `Listen` rewrite.
#[derive(Debug)]
pub struct HttpdConfig;

const DEFAULT_HTTPD_PORT: u16 = 8080;

#[async_trait]
impl PostInstallHook for HttpdConfig {
    fn name(&self) -> &'static str {
        "httpd-config"
    }

    async fn after_install(&self, ctx: &mut InstallContext) -> Result<()> {
        let conf = ctx.install_dir.join("conf").join("httpd.conf");
        if !tokio::fs::try_exists(&conf).await.unwrap_or(false) {
            debug!(path = %conf.display(), "httpd.conf not found, skipping");
            return Ok(());
        }
        let text = tokio::fs::read_to_string(&conf).await?;
        let port = ctx.def.port.unwrap_or(DEFAULT_HTTPD_PORT);
        let root = forward_slashes(&ctx.install_dir);
        tokio::fs::write(&conf, rewrite_httpd_conf(&text, &root, port)).await?;
        info!(path = %conf.display(), port, "httpd.conf rewritten");
        ctx.def.config_path = Some(conf);
        Ok(())
    }

    async fn port_changed(&self, def: &ServiceDefinition, port: u16) -> Result<()> {
        let Some(conf) = def.config_path.as_deref() else {
            return Ok(());
        };
        rewrite_file(conf, |text| rewrite_httpd_listen(text, port)).await
    }
}

/// 单行端口指令重写（redis `port N`、nginx `listen N;`）。
#[derive(Debug)]
pub struct DirectivePort {
    pattern: Regex,
    template: fn(u16) -> String,
}

impl DirectivePort {
    pub fn redis() -> Self {
        Self {
            pattern: Regex::new(r"(?m)^port \d+").expect("static regex"),
            template: |port| format!("port {port}"),
        }
    }

    pub fn nginx() -> Self {
        Self {
            pattern: Regex::new(r"listen\s+\d+;").expect("static regex"),
            template: |port| format!("listen {port};"),
        }
    }

    pub fn rewrite(&self, text: &str, port: u16) -> String {
        self.pattern
            .replace_all(text, NoExpand(&(self.template)(port)))
            .into_owned()
    }
}

#[async_trait]
impl PostInstallHook for DirectivePort {
    fn name(&self) -> &'static str {
        "directive-port"
    }

    async fn after_install(&self, _ctx: &mut InstallContext) -> Result<()> {
        Ok(())
    }

    async fn port_changed(&self, def: &ServiceDefinition, port: u16) -> Result<()> {
        let Some(conf) = def.config_path.as_deref() else {
            return Ok(());
        };
        rewrite_file(conf, |text| self.rewrite(text, port)).await
    }
}

/// Allow inbound connections to the service executable.
#[derive(Debug)]
pub struct FirewallRule;

#[async_trait]
impl PostInstallHook for FirewallRule {
    fn name(&self) -> &'static str {
        "firewall-rule"
    }

    #[cfg(windows)]
    async fn after_install(&self, ctx: &mut InstallContext) -> Result<()> {
        let Some(exe) = ctx.executable.as_ref() else {
            return Ok(());
        };
        let rule = format!("name={} HTTP Server", ctx.def.display_name);
        // 先删旧规则；不存在时忽略
        let _ = tokio::process::Command::new("netsh")
            .args(["advfirewall", "firewall", "delete", "rule", &rule])
            .output()
            .await;
        let out = tokio::process::Command::new("netsh")
            .args(["advfirewall", "firewall", "add", "rule", &rule, "dir=in", "action=allow"])
            .arg(format!("program={}", exe.display()))
            .arg("enable=yes")
            .output()
            .await?;
        if !out.status.success() {
            return Err(ServiceError::Install(format!(
                "netsh failed (administrator rights required?): {}",
                String::from_utf8_lossy(&out.stdout).trim()
            )));
        }
        info!(service = %ctx.def.name, "firewall rule added");
        Ok(())
    }

    #[cfg(not(windows))]
    async fn after_install(&self, ctx: &mut InstallContext) -> Result<()> {
        debug!(service = %ctx.def.name, "firewall rules are only managed on windows");
        Ok(())
    }
}

async fn rewrite_file<F>(path: &Path, rewrite: F) -> Result<()>
where
    F: FnOnce(&str) -> String,
{
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        debug!(path = %path.display(), "config file missing, nothing to rewrite");
        return Ok(());
    }
    let text = tokio::fs::read_to_string(path).await?;
    let updated = rewrite(&text);
    if updated != text {
        tokio::fs::write(path, updated).await?;
        info!(path = %path.display(), "config rewritten");
    }
    Ok(())
}

fn forward_slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn replace_lines(text: &str, pattern: &str, replacement: &str) -> String {
    match Regex::new(pattern) {
        Ok(re) => re.replace_all(text, NoExpand(replacement)).into_owned(),
        Err(_) => text.to_string(),
    }
}

/// Point `httpd.conf` at `root` and `port`.
pub fn rewrite_httpd_conf(text: &str, root: &str, port: u16) -> String {
    let docroot = format!("{root}/htdocs");
    let text = replace_lines(text, r#"(?m)^Define SRVROOT ".*"$"#, &format!(r#"Define SRVROOT "{root}""#));
    let text = replace_lines(&text, r#"(?m)^DocumentRoot ".*"$"#, &format!(r#"DocumentRoot "{docroot}""#));
    let text = replace_lines(
        &text,
        r#"(?m)^<Directory ".*htdocs">$"#,
        &format!(r#"<Directory "{docroot}">"#),
    );
    rewrite_httpd_listen(&text, port)
}

/// `Listen N` lines plus `ServerName`, enabling the commented default if needed.
pub fn rewrite_httpd_listen(text: &str, port: u16) -> String {
    let text = replace_lines(text, r"(?m)^Listen \d+$", &format!("Listen {port}"));
    let server_name = format!("ServerName localhost:{port}");
    if Regex::new(r"(?m)^ServerName ").map(|re| re.is_match(&text)).unwrap_or(false) {
        replace_lines(&text, r"(?m)^ServerName \S+$", &server_name)
    } else {
        replace_lines(&text, r"(?m)^#ServerName .*$", &server_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HTTPD_CONF: &str = r#"Define SRVROOT "c:/Apache24"
ServerRoot "${SRVROOT}"
Listen 80
#ServerName www.example.com:80
DocumentRoot "c:/Apache24/htdocs"
<Directory "c:/Apache24/htdocs">
    Require all granted
</Directory>
"#;

    #[test]
    fn httpd_conf_is_relocated() {
        let out = rewrite_httpd_conf(HTTPD_CONF, "/home/u/.stackyard/services/apache", 8080);
        assert!(out.contains(r#"Define SRVROOT "/home/u/.stackyard/services/apache""#));
        assert!(out.contains(r#"DocumentRoot "/home/u/.stackyard/services/apache/htdocs""#));
        assert!(out.contains(r#"<Directory "/home/u/.stackyard/services/apache/htdocs">"#));
        assert!(out.contains("\nListen 8080\n"));
        assert!(out.contains("\nServerName localhost:8080\n"));
        // ${SRVROOT} must survive untouched.
        assert!(out.contains(r#"ServerRoot "${SRVROOT}""#));
    }

    #[test]
    fn listen_rewrite_touches_only_listen_lines() {
        let text = "Listen 8080\n# Listen 9999 is an example\nServerName localhost:8080\n";
        let out = rewrite_httpd_listen(text, 9090);
        assert_eq!(
            out,
            "Listen 9090\n# Listen 9999 is an example\nServerName localhost:9090\n"
        );
    }

    #[test]
    fn directive_ports() {
        let redis = DirectivePort::redis();
        assert_eq!(
            redis.rewrite("bind 127.0.0.1\nport 6379\n", 6380),
            "bind 127.0.0.1\nport 6380\n"
        );
        let nginx = DirectivePort::nginx();
        assert_eq!(
            nginx.rewrite("server {\n    listen       80;\n}\n", 8081),
            "server {\n    listen 8081;\n}\n"
        );
    }

    #[tokio::test]
    async fn port_changed_rewrites_config_file() {
        let dir = TempDir::new().unwrap();
        let conf = dir.path().join("redis.conf");
        std::fs::write(&conf, "port 6379\n").unwrap();
        let mut def = ServiceDefinition::new("redis", "redis-server");
        def.config_path = Some(conf.clone());

        PostInstallHooks::defaults().port_changed(&def, 7000).await.unwrap();
        assert_eq!(std::fs::read_to_string(&conf).unwrap(), "port 7000\n");
    }

    #[tokio::test]
    async fn port_changed_without_config_is_noop() {
        let def = ServiceDefinition::new("nginx", "nginx");
        PostInstallHooks::defaults().port_changed(&def, 8088).await.unwrap();
    }

    #[tokio::test]
    async fn link_executable_copies_into_bin() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::new(dir.path().join("home"));
        let exe = dir.path().join("pkg").join("tool");
        std::fs::create_dir_all(exe.parent().unwrap()).unwrap();
        std::fs::write(&exe, b"binary").unwrap();

        let mut ctx = InstallContext {
            def: ServiceDefinition::new("tool", "tool"),
            paths: paths.clone(),
            install_dir: dir.path().join("pkg"),
            executable: Some(exe),
        };
        LinkExecutable.after_install(&mut ctx).await.unwrap();
        assert_eq!(std::fs::read(paths.bin_dir().join("tool")).unwrap(), b"binary");
    }

    #[tokio::test]
    async fn httpd_hook_sets_config_path() {
        let dir = TempDir::new().unwrap();
        let install_dir = dir.path().join("apache");
        std::fs::create_dir_all(install_dir.join("conf")).unwrap();
        std::fs::write(install_dir.join("conf").join("httpd.conf"), HTTPD_CONF).unwrap();

        let mut def = ServiceDefinition::new("apache", "httpd");
        def.port = Some(8181);
        let mut ctx = InstallContext {
            def,
            paths: Paths::new(dir.path()),
            install_dir: install_dir.clone(),
            executable: None,
        };
        HttpdConfig.after_install(&mut ctx).await.unwrap();

        let conf = install_dir.join("conf").join("httpd.conf");
        assert_eq!(ctx.def.config_path.as_deref(), Some(conf.as_path()));
        assert!(std::fs::read_to_string(conf).unwrap().contains("Listen 8181"));
    }
}
