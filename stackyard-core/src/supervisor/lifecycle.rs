//! 服务生命周期：启动、停止、批量操作与端口变更。

use super::reconcile::release;
use super::*;
use crate::models::OperationResult;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, instrument, warn};

impl ServiceSupervisor {
    /// Start `name` and wait until it is confirmed running.
    ///
    /// Idempotent: an already running service is returned unchanged.
    #[instrument(skip(self))]
    pub async fn start(&self, name: &str) -> Result<ServiceStatus> {
        self.registry.get(name).await?;
        let lock = self.op_lock(name);
        let _guard = lock.lock().await;
        self.start_locked(name).await
    }

    /// Stop `name`, escalating from SIGTERM to a forced kill.
    #[instrument(skip(self))]
    pub async fn stop(&self, name: &str) -> Result<ServiceStatus> {
        self.registry.get(name).await?;
        let lock = self.op_lock(name);
        let _guard = lock.lock().await;
        self.stop_locked(name).await
    }

    /// 启动所有 enabled && auto_start 的服务；失败只记录日志。
    #[instrument(skip(self))]
    pub async fn start_all(&self) {
        let targets: Vec<_> = self
            .registry
            .all()
            .await
            .into_iter()
            .filter(|d| d.enabled && d.auto_start)
            .collect();
        info!(count = targets.len(), "starting auto-start services");
        for def in targets {
            if let Err(e) = self.start(&def.name).await {
                warn!(service = %def.name, error = %e, "auto-start failed");
            }
        }
    }

    /// 停止所有由我们持有或判定为运行中的服务，最后按进程名清扫。
    #[instrument(skip(self))]
    pub async fn stop_all(&self) {
        let defs = self.registry.all().await;
        let targets: Vec<_> = defs
            .iter()
            .filter(|d| {
                self.with_runtime(&d.name, |state| {
                    state.handle.is_some() || state.status.state == ServiceState::Running
                })
            })
            .collect();

        if !targets.is_empty() {
            info!(count = targets.len(), "stopping running services");
        }
        for def in targets {
            if let Err(e) = self.stop(&def.name).await {
                warn!(service = %def.name, error = %e, "failed to stop service");
            }
        }

        for def in &defs {
            let killed = self.kill_by_name(&def.executable_name()).await;
            if killed > 0 {
                info!(service = %def.name, killed, "swept leftover processes");
            }
        }
        self.ports.clear();
    }

    /// Move `name` to a new port: stop if running, persist, let hooks
    /// rewrite config, restart if it was running.
    #[instrument(skip(self))]
    pub async fn update_port(&self, name: &str, port: u16) -> Result<OperationResult> {
        let def = self.registry.get(name).await?;
        if !self.registry.is_installed(&def) {
            return Err(ServiceError::NotInstalled(name.to_string()));
        }

        let lock = self.op_lock(name);
        let _guard = lock.lock().await;

        let outcome: Result<bool> = async {
            let was_running = self.reconcile(&def).await.state == ServiceState::Running;
            if was_running {
                self.stop_locked(name).await?;
            }

            let updated = self.registry.update(name, |d| d.port = Some(port)).await?;
            if let Some(old) = def.port {
                self.ports.invalidate(old);
            }
            self.ports.invalidate(port);
            self.with_runtime(name, |state| state.status.port = Some(port));

            self.hooks.port_changed(&updated, port).await?;

            if was_running {
                self.start_locked(name).await?;
            }
            Ok(was_running)
        }
        .await;

        Ok(match outcome {
            Ok(true) => OperationResult::ok(format!("{name} restarted on port {port}")),
            Ok(false) => OperationResult::ok(format!("{name} now uses port {port}")),
            Err(e) => {
                warn!(service = %name, port, error = %e, "port update failed");
                OperationResult::failed(e.to_string())
            }
        })
    }

    pub(super) async fn start_locked(&self, name: &str) -> Result<ServiceStatus> {
        let def = self.registry.get(name).await?;
        if !def.enabled {
            return Err(ServiceError::Disabled(name.to_string()));
        }
        if !self.registry.is_installed(&def) {
            return Err(ServiceError::NotInstalled(name.to_string()));
        }

        let current = self.reconcile(&def).await;
        if current.state == ServiceState::Running {
            debug!(service = %name, "already running");
            return Ok(current);
        }
        if current.state == ServiceState::Error {
            self.drop_failed_handle(&def).await?;
        }

        self.transition(name, Notify::Updated, |state| {
            state.status.state = ServiceState::Starting;
            state.status.port = def.port;
            state.status.last_error = None;
        });

        match self.launch(&def).await {
            Ok(status) => Ok(status),
            Err(e) => {
                self.fail(&def, &e);
                Err(e)
            }
        }
    }

    /// 强杀失败后句柄仍被保留：进程已消失则释放，否则重新走一遍终止流程。
    async fn drop_failed_handle(&self, def: &ServiceDefinition) -> Result<()> {
        let held = self.with_runtime(&def.name, |state| {
            state.handle.as_ref().map(|h| (h.pid, h.generation))
        });
        let Some((pid, generation)) = held else {
            return Ok(());
        };

        if self.processes.is_alive(pid).await {
            warn!(service = %def.name, pid, "previous process still alive, stopping it before start");
            if let Err(e) = self.halt(def).await {
                self.fail(def, &e);
                return Err(e);
            }
        } else {
            debug!(service = %def.name, pid, "releasing handle of exited process");
        }
        self.with_runtime(&def.name, |state| release(state, Some(generation)));
        Ok(())
    }

    async fn launch(&self, def: &ServiceDefinition) -> Result<ServiceStatus> {
        if let Some(port) = def.port {
            if self.ports.probe_fresh(port).await {
                info!(service = %def.name, port, "port already in use, treating as externally running");
                return Ok(self.transition(&def.name, Notify::Started, |state| {
                    state.status.state = ServiceState::Running;
                    state.status.pid = None;
                    state.status.started_at = Some(Utc::now());
                    state.last_check = Some(Instant::now());
                }));
            }
        }

        let exe = def.resolve_executable(self.paths()).ok_or_else(|| {
            ServiceError::SpawnFailed(format!("executable not found: {}", def.executable))
        })?;
        for dir in def.directories() {
            tokio::fs::create_dir_all(&dir).await?;
        }

        let (pid, generation, exited) = self.spawn_process(def, &exe).await?;
        self.confirm_start(def, pid, exited).await?;

        // 确认与退出观察者在同一把锁下竞争：句柄还在才算成功
        let confirmed = self.with_runtime(&def.name, |state| {
            match state.handle.as_mut().filter(|h| h.generation == generation) {
                Some(handle) => {
                    handle.confirmed = true;
                    state.status.state = ServiceState::Running;
                    state.status.pid = Some(pid);
                    state.status.started_at = Some(handle.started_at);
                    state.status.last_error = None;
                    state.last_check = Some(Instant::now());
                    state.status.refresh_uptime();
                    let status = state.status.clone();
                    self.notify(&def.name, Notify::Started, &status);
                    Some(status)
                }
                None => None,
            }
        });
        let status = confirmed.ok_or_else(|| {
            ServiceError::SpawnFailed(format!("process {pid} exited during startup"))
        })?;
        info!(service = %def.name, pid, "service running");
        Ok(status)
    }

    /// Wait for the declared port to bind, or the confirmation window to
    /// pass with the process still alive.
    async fn confirm_start(
        &self,
        def: &ServiceDefinition,
        pid: u32,
        mut exited: watch::Receiver<Option<ExitOutcome>>,
    ) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.config.start_confirm;
        loop {
            let outcome = exited.borrow().clone();
            if let Some(outcome) = outcome {
                return Err(ServiceError::SpawnFailed(format!(
                    "process {pid} exited during startup ({outcome})"
                )));
            }
            if let Some(port) = def.port {
                if self.ports.probe_fresh(port).await {
                    debug!(service = %def.name, port, "port bound");
                    return Ok(());
                }
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                if let Some(port) = def.port {
                    warn!(service = %def.name, pid, port, "port not bound within confirmation window, assuming running");
                }
                return Ok(());
            }
            let wait = self.config.start_poll.min(deadline - now);
            let _ = timeout(wait, exited.changed()).await;
        }
    }

    pub(super) async fn stop_locked(&self, name: &str) -> Result<ServiceStatus> {
        let def = self.registry.get(name).await?;
        let current = self.reconcile(&def).await;
        if current.state == ServiceState::Stopped && !self.has_handle(name) {
            debug!(service = %name, "already stopped");
            return Ok(current);
        }

        self.transition(name, Notify::Updated, |state| {
            state.status.state = ServiceState::Stopping;
        });

        match self.halt(&def).await {
            Ok(()) => {
                let status = self.transition(name, Notify::Stopped, |state| {
                    state.handle = None;
                    state.status = ServiceStatus::stopped(name, def.port);
                    state.last_check = Some(Instant::now());
                });
                info!(service = %name, "service stopped");
                Ok(status)
            }
            Err(e) => {
                self.fail(&def, &e);
                Err(e)
            }
        }
    }

    async fn halt(&self, def: &ServiceDefinition) -> Result<()> {
        let held = self.with_runtime(&def.name, |state| {
            state.handle.as_mut().map(|h| {
                h.stop_requested = true;
                (h.pid, h.exited.clone())
            })
        });

        if let Some((pid, mut exited)) = held {
            info!(service = %def.name, pid, "sending SIGTERM");
            if !self.terminate(pid).await {
                debug!(service = %def.name, pid, "graceful signal not delivered");
            }
            let graceful = timeout(self.config.stop_grace, exited.wait_for(Option::is_some))
                .await
                .is_ok();
            if !graceful {
                warn!(service = %def.name, pid, "no exit within grace period, killing process tree");
                self.kill_tree(pid).await;
                let gone = timeout(self.config.kill_wait, exited.wait_for(Option::is_some))
                    .await
                    .is_ok();
                if !gone {
                    return Err(ServiceError::ForceKillFailed(format!(
                        "process {pid} still alive after forced kill"
                    )));
                }
            }
        }

        if let Some(port) = def.port {
            self.ports.invalidate(port);
            if self.ports.probe_fresh(port).await {
                let exe_name = def.executable_name();
                let killed = self.kill_by_name(&exe_name).await;
                info!(service = %def.name, port, killed, exe = %exe_name, "port still in use, killed by name");
                if !self.wait_port_free(port, self.config.kill_wait).await {
                    return Err(ServiceError::ForceKillFailed(format!(
                        "port {port} still in use after stop"
                    )));
                }
            }
        }
        Ok(())
    }

    async fn wait_port_free(&self, port: u16, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            if !self.ports.probe_fresh(port).await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.config.start_poll).await;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::super::testing::*;
    use super::*;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn start_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let exe = write_script(&dir.path().join("bin"), &unique_name("idem"), SLEEPER);
        let sup = supervisor_with(dir.path(), vec![installed("idem", &exe)]).await;

        let first = sup.start("idem").await.unwrap();
        assert_eq!(first.state, ServiceState::Running);
        let pid = first.pid.unwrap();

        let second = sup.start("idem").await.unwrap();
        assert_eq!(second.state, ServiceState::Running);
        assert_eq!(second.pid, Some(pid));

        let stopped = sup.stop("idem").await.unwrap();
        assert_eq!(stopped.state, ServiceState::Stopped);
        assert_eq!(stopped.pid, None);
    }

    #[tokio::test]
    async fn start_emits_updated_then_started() {
        let dir = TempDir::new().unwrap();
        let exe = write_script(&dir.path().join("bin"), &unique_name("evt"), SLEEPER);
        let sup = supervisor_with(dir.path(), vec![installed("evt", &exe)]).await;
        let mut events = sup.events();

        sup.start("evt").await.unwrap();
        match events.recv().await.unwrap() {
            ServiceEvent::ServiceStatusUpdated { status, .. } => {
                assert_eq!(status.state, ServiceState::Starting)
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(
            events.recv().await.unwrap(),
            ServiceEvent::ServiceStarted { .. }
        ));
        sup.stop("evt").await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_starts_spawn_once() {
        let dir = TempDir::new().unwrap();
        let exe = write_script(&dir.path().join("bin"), &unique_name("race"), SLEEPER);
        let sup = supervisor_with(dir.path(), vec![installed("race", &exe)]).await;

        let (a, b, c) = tokio::join!(sup.start("race"), sup.start("race"), sup.status("race"));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.pid, b.pid);
        assert!(matches!(
            c.unwrap().state,
            ServiceState::Stopped | ServiceState::Starting | ServiceState::Running
        ));

        let (stop, start) = tokio::join!(sup.stop("race"), sup.start("race"));
        stop.unwrap();
        start.unwrap();
        sup.stop("race").await.unwrap();
        assert!(!sup.has_handle("race"));
    }

    #[tokio::test]
    async fn occupied_port_means_external_and_no_spawn() {
        let dir = TempDir::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let exe = write_script(&dir.path().join("bin"), &unique_name("ext"), SLEEPER);
        let mut def = installed("ext", &exe);
        def.port = Some(port);
        let sup = supervisor_with(dir.path(), vec![def]).await;

        let status = sup.start("ext").await.unwrap();
        assert_eq!(status.state, ServiceState::Running);
        assert_eq!(status.pid, None);
        assert!(!sup.has_handle("ext"));
    }

    #[tokio::test]
    async fn disabled_service_never_starts() {
        let dir = TempDir::new().unwrap();
        let exe = write_script(&dir.path().join("bin"), &unique_name("off"), SLEEPER);
        let mut def = installed("off", &exe);
        def.enabled = false;
        let sup = supervisor_with(dir.path(), vec![def]).await;
        let mut events = sup.events();

        let err = sup.start("off").await.unwrap_err();
        assert!(matches!(err, ServiceError::Disabled(_)));
        assert_eq!(sup.status("off").await.unwrap().state, ServiceState::Stopped);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_executable_is_not_installed() {
        let dir = TempDir::new().unwrap();
        let def = ServiceDefinition::new("ghost", "stackyard-no-such-binary-4711");
        let sup = supervisor_with(dir.path(), vec![def]).await;
        let err = sup.start("ghost").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotInstalled(_)));
        let err = sup.start("nope").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn early_exit_is_spawn_failure() {
        let dir = TempDir::new().unwrap();
        let exe = write_script(&dir.path().join("bin"), &unique_name("crash"), CRASHER);
        let sup = supervisor_with(dir.path(), vec![installed("crash", &exe)]).await;

        let err = sup.start("crash").await.unwrap_err();
        assert!(matches!(err, ServiceError::SpawnFailed(_)));
        let status = sup.status("crash").await.unwrap();
        assert_eq!(status.state, ServiceState::Error);
        assert!(status.last_error.is_some());
        assert!(!sup.has_handle("crash"));

        let log = std::fs::read_to_string(dir.path().join("logs").join("crash.log")).unwrap();
        assert!(log.contains("process exited"));
    }

    #[tokio::test]
    async fn unexpected_exit_after_confirmation_reads_stopped() {
        let dir = TempDir::new().unwrap();
        let exe = write_script(&dir.path().join("bin"), &unique_name("late"), "sleep 1\nexit 2");
        let sup = supervisor_with(dir.path(), vec![installed("late", &exe)]).await;
        let mut events = sup.events();

        sup.start("late").await.unwrap();
        let stopped = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let ServiceEvent::ServiceStopped { status, .. } = events.recv().await.unwrap() {
                    return status;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(stopped.state, ServiceState::Stopped);
        assert!(!sup.has_handle("late"));
    }

    #[tokio::test]
    async fn stubborn_process_is_force_killed() {
        let dir = TempDir::new().unwrap();
        let exe = write_script(&dir.path().join("bin"), &unique_name("mule"), STUBBORN);
        let sup = supervisor_with(dir.path(), vec![installed("mule", &exe)]).await;

        let pid = sup.start("mule").await.unwrap().pid.unwrap();
        let begun = std::time::Instant::now();
        let status = sup.stop("mule").await.unwrap();
        assert_eq!(status.state, ServiceState::Stopped);
        assert!(begun.elapsed() < Duration::from_secs(5));
        assert!(!sup.processes.is_alive(pid).await);
    }

    #[tokio::test]
    async fn foreign_port_owner_fails_stop() {
        let dir = TempDir::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let exe = write_script(&dir.path().join("bin"), &unique_name("held"), SLEEPER);
        let mut def = installed("held", &exe);
        def.port = Some(port);
        let sup = supervisor_with(dir.path(), vec![def]).await;

        sup.start("held").await.unwrap();
        let err = sup.stop("held").await.unwrap_err();
        assert!(matches!(err, ServiceError::ForceKillFailed(_)));
        let status = sup.status("held").await.unwrap();
        assert_eq!(status.state, ServiceState::Error);

        drop(listener);
        let status = sup.stop("held").await.unwrap();
        assert_eq!(status.state, ServiceState::Stopped);
    }

    #[tokio::test]
    async fn stop_kills_external_listener_by_name() {
        use std::os::unix::process::ExitStatusExt;

        let perl = std::path::Path::new("/usr/bin/perl");
        if !perl.exists() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let exe = bin.join(unique_name("perl"));
        std::fs::copy(perl, &exe).unwrap();

        let port = free_port();
        let mut listener = std::process::Command::new(&exe)
            .args([
                "-MIO::Socket::INET",
                "-e",
                "my $s = IO::Socket::INET->new(LocalAddr => '127.0.0.1', LocalPort => $ARGV[0], Listen => 5, ReuseAddr => 1) or die $!; sleep 60",
                &port.to_string(),
            ])
            .spawn()
            .unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while std::net::TcpStream::connect(("127.0.0.1", port)).is_err() {
            assert!(std::time::Instant::now() < deadline, "listener never bound");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let mut def = installed("extl", &exe);
        def.port = Some(port);
        let sup = supervisor_with(dir.path(), vec![def]).await;

        let status = sup.start("extl").await.unwrap();
        assert_eq!(status.state, ServiceState::Running);
        assert_eq!(status.pid, None);
        assert!(!sup.has_handle("extl"));

        let status = sup.stop("extl").await.unwrap();
        assert_eq!(status.state, ServiceState::Stopped);

        let exit = listener.wait().unwrap();
        assert_eq!(exit.signal(), Some(9));
    }

    #[tokio::test]
    async fn start_after_failed_kill_replaces_live_process() {
        let dir = TempDir::new().unwrap();
        let exe = write_script(&dir.path().join("bin"), &unique_name("retry"), SLEEPER);
        let def = installed("retry", &exe);
        let sup = supervisor_with(dir.path(), vec![def.clone()]).await;

        let old = sup.start("retry").await.unwrap().pid.unwrap();
        // stop 强杀失败后的状态：error，句柄仍在
        sup.fail(
            &def,
            &ServiceError::ForceKillFailed(format!("process {old} still alive after forced kill")),
        );
        assert!(sup.has_handle("retry"));

        let status = sup.start("retry").await.unwrap();
        assert_eq!(status.state, ServiceState::Running);
        let new = status.pid.unwrap();
        assert_ne!(new, old);
        assert!(!sup.processes.is_alive(old).await);

        sup.stop("retry").await.unwrap();
        assert!(!sup.has_handle("retry"));
    }

    #[tokio::test]
    async fn update_port_restarts_on_new_port() {
        let dir = TempDir::new().unwrap();
        let exe = write_script(&dir.path().join("bin"), &unique_name("move"), SLEEPER);
        let mut def = installed("move", &exe);
        def.port = Some(free_port());
        let sup = supervisor_with(dir.path(), vec![def]).await;

        let before = sup.start("move").await.unwrap();
        assert_eq!(before.state, ServiceState::Running);

        let new_port = free_port();
        let result = sup.update_port("move", new_port).await.unwrap();
        assert!(result.success, "{result:?}");

        let status = sup.status("move").await.unwrap();
        assert_eq!(status.state, ServiceState::Running);
        assert_eq!(status.port, Some(new_port));
        assert_ne!(status.pid, before.pid);
        assert_eq!(sup.registry().get("move").await.unwrap().port, Some(new_port));

        sup.stop("move").await.unwrap();
    }

    #[tokio::test]
    async fn update_port_while_stopped_only_persists() {
        let dir = TempDir::new().unwrap();
        let exe = write_script(&dir.path().join("bin"), &unique_name("idle"), SLEEPER);
        let sup = supervisor_with(dir.path(), vec![installed("idle", &exe)]).await;

        let result = sup.update_port("idle", 15999).await.unwrap();
        assert!(result.success);
        assert_eq!(sup.status("idle").await.unwrap().state, ServiceState::Stopped);
        assert_eq!(sup.registry().get("idle").await.unwrap().port, Some(15999));
    }

    #[tokio::test]
    async fn stop_all_stops_everything_including_stubborn() {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("bin");
        let mut defs = Vec::new();
        for (name, body) in [("one", SLEEPER), ("two", SLEEPER), ("three", STUBBORN)] {
            let exe = write_script(&bin, &unique_name(name), body);
            let mut def = installed(name, &exe);
            def.auto_start = true;
            defs.push(def);
        }
        let sup = supervisor_with(dir.path(), defs).await;

        sup.start_all().await;
        for name in ["one", "two", "three"] {
            assert_eq!(sup.status(name).await.unwrap().state, ServiceState::Running);
        }

        sup.stop_all().await;
        for name in ["one", "two", "three"] {
            assert_eq!(sup.status(name).await.unwrap().state, ServiceState::Stopped);
            assert!(!sup.has_handle(name));
        }
    }
}
