//! 子进程创建：stdout/stderr 转发到 tracing 与日志文件，后台等待退出。

use super::*;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task;
use tokio::time::Duration;
use tracing::{debug, info, warn};

/// 日志文件最大大小（2MB），超过此值触发截断
const LOG_MAX_SIZE: u64 = 2 * 1024 * 1024;
/// 截断后保留的大小（1MB）
const LOG_RETAIN_SIZE: u64 = 1024 * 1024;
/// 每写入多少行检查一次文件大小
const LOG_CHECK_INTERVAL: u32 = 100;
/// Retries for "text file busy" right after the executable was written.
const SPAWN_BUSY_RETRIES: u32 = 5;

impl ServiceSupervisor {
    /// Spawn the service's process and register its handle.
    ///
    /// Fails with `AlreadyRunning` if a handle is already held.
    pub(super) async fn spawn_process(
        &self,
        def: &ServiceDefinition,
        exe: &Path,
    ) -> Result<(u32, u64, watch::Receiver<Option<ExitOutcome>>)> {
        if self.has_handle(&def.name) {
            return Err(ServiceError::AlreadyRunning(def.name.clone()));
        }

        let log_path = self.log_path(def);
        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut child = spawn_child(def, exe).await?;
        let pid = child
            .id()
            .ok_or_else(|| ServiceError::SpawnFailed("missing pid".into()))?;
        info!(service = %def.name, pid, exe = %exe.display(), "process spawned");

        let (line_tx, line_rx) = mpsc::channel::<String>(256);
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(def.name.clone(), "stdout", stdout, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(def.name.clone(), "stderr", stderr, line_tx);
        }
        spawn_log_writer(log_path.clone(), line_rx);

        let generation = self.next_generation();
        let (exit_tx, exit_rx) = watch::channel(None);
        let registered = self.with_runtime(&def.name, |state| {
            if state.handle.is_some() {
                return false;
            }
            state.handle = Some(ProcessHandle {
                pid,
                generation,
                started_at: Utc::now(),
                confirmed: false,
                stop_requested: false,
                exited: exit_rx.clone(),
            });
            true
        });
        if !registered {
            let _ = child.start_kill();
            return Err(ServiceError::AlreadyRunning(def.name.clone()));
        }

        self.spawn_wait_handler(child, def.name.clone(), generation, log_path, exit_tx);
        Ok((pid, generation, exit_rx))
    }

    /// Per-service output log: `<log_path>/<name>.log` or `<home>/logs/<name>.log`.
    pub(super) fn log_path(&self, def: &ServiceDefinition) -> PathBuf {
        let dir = def
            .log_path
            .clone()
            .unwrap_or_else(|| self.paths().logs_dir());
        dir.join(format!("{}.log", def.name))
    }

    /// 后台等待进程退出：释放句柄，非主动退出时更新状态并发事件。
    fn spawn_wait_handler(
        &self,
        mut child: Child,
        name: String,
        generation: u64,
        log_path: PathBuf,
        exit_tx: watch::Sender<Option<ExitOutcome>>,
    ) {
        let supervisor = self.clone();
        task::spawn(async move {
            let outcome = match child.wait().await {
                Ok(status) => ExitOutcome::Exited(status.code()),
                Err(e) => ExitOutcome::Failed(e.to_string()),
            };
            // 记录退出状态，便于排查启动后瞬停。
            let _ = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .and_then(|mut f| writeln!(f, "process exited: {outcome}"));

            // 先释放句柄再通知等待者
            supervisor.on_exit(&name, generation, outcome.clone());
            let _ = exit_tx.send(Some(outcome));
        });
    }

    fn on_exit(&self, name: &str, generation: u64, outcome: ExitOutcome) {
        self.with_runtime(name, |state| {
            let Some(handle) = state.handle.take_if_generation(generation) else {
                return;
            };
            if !handle.confirmed || handle.stop_requested {
                debug!(service = %name, pid = handle.pid, %outcome, "exit handled by pending operation");
                return;
            }

            let notify = match &outcome {
                ExitOutcome::Exited(code) => {
                    if *code != Some(0) {
                        warn!(service = %name, pid = handle.pid, %outcome, "process exited unexpectedly");
                    } else {
                        info!(service = %name, pid = handle.pid, "process exited");
                    }
                    state.status.state = ServiceState::Stopped;
                    state.status.last_error = None;
                    Notify::Stopped
                }
                ExitOutcome::Failed(e) => {
                    warn!(service = %name, pid = handle.pid, error = %e, "waiting on process failed");
                    state.status.state = ServiceState::Error;
                    state.status.last_error = Some(outcome.to_string());
                    Notify::Error
                }
            };
            state.status.pid = None;
            state.status.started_at = None;
            state.status.refresh_uptime();
            state.last_check = Some(Instant::now());
            let status = state.status.clone();
            self.notify(name, notify, &status);
        });
    }
}

trait TakeIfGeneration {
    fn take_if_generation(&mut self, generation: u64) -> Option<ProcessHandle>;
}

impl TakeIfGeneration for Option<ProcessHandle> {
    /// Release the handle only if it still belongs to `generation`.
    fn take_if_generation(&mut self, generation: u64) -> Option<ProcessHandle> {
        if self.as_ref().map(|h| h.generation) == Some(generation) {
            self.take()
        } else {
            None
        }
    }
}

async fn spawn_child(def: &ServiceDefinition, exe: &Path) -> Result<Child> {
    let mut attempt = 0;
    loop {
        let mut cmd = Command::new(exe);
        cmd.args(&def.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        if let Some(dir) = exe.parent().filter(|d| !d.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }

        match cmd.spawn() {
            Ok(child) => return Ok(child),
            Err(e) if is_text_busy(&e) && attempt < SPAWN_BUSY_RETRIES => {
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(20 * u64::from(attempt))).await;
            }
            Err(e) => {
                return Err(ServiceError::SpawnFailed(format!("{}: {e}", exe.display())));
            }
        }
    }
}

#[cfg(unix)]
fn is_text_busy(e: &std::io::Error) -> bool {
    // ETXTBSY
    e.raw_os_error() == Some(26)
}

#[cfg(not(unix))]
fn is_text_busy(_e: &std::io::Error) -> bool {
    false
}

fn spawn_line_reader<R>(name: String, stream: &'static str, reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    task::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(service = %name, stream, "{line}");
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
}

/// 单一写入任务：追加日志行，定期检查大小并截断。
fn spawn_log_writer(log_path: PathBuf, mut rx: mpsc::Receiver<String>) {
    task::spawn(async move {
        let open = |path: PathBuf| async move {
            tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .ok()
        };
        let mut file = open(log_path.clone()).await;
        let mut line_count: u32 = 0;
        while let Some(line) = rx.recv().await {
            if let Some(f) = file.as_mut() {
                let _ = f.write_all(line.as_bytes()).await;
                let _ = f.write_all(b"\n").await;
            }
            line_count += 1;
            if line_count < LOG_CHECK_INTERVAL {
                continue;
            }
            line_count = 0;
            let need_truncate = match file.as_ref() {
                Some(f) => f
                    .metadata()
                    .await
                    .map(|m| m.len() > LOG_MAX_SIZE)
                    .unwrap_or(false),
                None => false,
            };
            if need_truncate {
                drop(file.take());
                let path = log_path.clone();
                let _ = task::spawn_blocking(move || truncate_log_file(&path, LOG_RETAIN_SIZE)).await;
                file = open(log_path.clone()).await;
            }
        }
    });
}

/// 截断日志文件，保留末尾指定大小的内容
fn truncate_log_file(path: &Path, retain_size: u64) {
    let Ok(mut file) = File::open(path) else {
        return;
    };
    let Ok(metadata) = file.metadata() else {
        return;
    };
    let file_size = metadata.len();
    if file_size <= retain_size {
        return;
    }

    if file.seek(SeekFrom::Start(file_size - retain_size)).is_err() {
        return;
    }
    let mut retained = Vec::with_capacity(retain_size as usize);
    if file.read_to_end(&mut retained).is_err() {
        return;
    }
    drop(file);

    // 跳过第一个不完整的行
    let line_start = retained
        .iter()
        .position(|&b| b == b'\n')
        .map(|i| i + 1)
        .unwrap_or(0);

    if let Ok(mut file) = File::create(path) {
        let _ = file.write_all(b"[... log truncated ...]\n");
        let _ = file.write_all(&retained[line_start..]);
    }
}
