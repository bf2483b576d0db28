//! 进程终止：优雅信号、进程树强杀、按可执行文件名清扫。

use super::*;
use sysinfo::{Pid, ProcessRefreshKind, Signal};
use tokio::task;
use tracing::debug;

impl ServiceSupervisor {
    /// Ask the process to exit (SIGTERM). Returns false if the signal could
    /// not be delivered or is unsupported on this platform.
    pub(super) async fn terminate(&self, pid: u32) -> bool {
        let system = self.system.clone();
        task::spawn_blocking(move || {
            let mut sys = system.lock().unwrap_or_else(|e| e.into_inner());
            let pid = Pid::from(pid as usize);
            if !sys.refresh_process_specifics(pid, ProcessRefreshKind::new()) {
                return false;
            }
            sys.process(pid)
                .and_then(|p| p.kill_with(Signal::Term))
                .unwrap_or(false)
        })
        .await
        .unwrap_or(false)
    }

    /// 杀死进程树；失败返回 false。
    pub(super) async fn kill_tree(&self, pid: u32) -> bool {
        if kill_tree_native(pid).await {
            return true;
        }
        let system = self.system.clone();
        task::spawn_blocking(move || {
            let mut sys = system.lock().unwrap_or_else(|e| e.into_inner());
            kill_tree_fallback(&mut sys, Pid::from(pid as usize))
        })
        .await
        .unwrap_or(false)
    }

    /// Force-kill every process whose name matches `exe_name`, with its
    /// children. Our own process is never touched. Returns the match count.
    pub(super) async fn kill_by_name(&self, exe_name: &str) -> usize {
        let system = self.system.clone();
        let target = exe_name.to_string();
        task::spawn_blocking(move || {
            let mut sys = system.lock().unwrap_or_else(|e| e.into_inner());
            sys.refresh_processes();
            let own = Pid::from(std::process::id() as usize);
            let matches: Vec<Pid> = sys
                .processes()
                .iter()
                .filter(|(pid, p)| **pid != own && name_matches(p.name(), &target))
                .map(|(pid, _)| *pid)
                .collect();
            for pid in &matches {
                debug!(pid = %pid, name = %target, "killing process by name");
                kill_tree_fallback(&mut sys, *pid);
            }
            matches.len()
        })
        .await
        .unwrap_or(0)
    }
}

/// Process names may drop the `.exe` suffix and, on Linux, are cut at 15 bytes.
fn name_matches(process_name: &str, target: &str) -> bool {
    if target.is_empty() {
        return false;
    }
    let strip = |s: &str| {
        s.strip_suffix(".exe")
            .or_else(|| s.strip_suffix(".EXE"))
            .unwrap_or(s)
            .to_string()
    };
    let (name, target) = (strip(process_name), strip(target));
    name == target || (name.len() == 15 && target.len() > 15 && target.starts_with(&name))
}

#[cfg(windows)]
async fn kill_tree_native(pid: u32) -> bool {
    // taskkill /F 强制终止，/T 终止进程树
    tokio::process::Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .output()
        .await
        .map(|out| out.status.success())
        .unwrap_or(false)
}

#[cfg(unix)]
async fn kill_tree_native(_pid: u32) -> bool {
    // 不按进程组杀，交给 fallback 逐个处理
    false
}

/// 使用 sysinfo 收集并杀死进程树，从叶子节点向上。
fn kill_tree_fallback(sys: &mut System, root: Pid) -> bool {
    sys.refresh_processes();
    let mut tree = Vec::new();
    collect_process_tree(sys, root, &mut tree);
    if tree.is_empty() {
        return true;
    }
    tree.reverse();

    let mut all_killed = true;
    for pid in tree {
        if let Some(process) = sys.process(pid) {
            if !process.kill() {
                all_killed = false;
            }
        }
    }
    all_killed
}

fn collect_process_tree(sys: &System, pid: Pid, result: &mut Vec<Pid>) {
    if sys.process(pid).is_some() {
        result.push(pid);
    }
    for (child_pid, process) in sys.processes() {
        if process.parent() == Some(pid) && !result.contains(child_pid) {
            collect_process_tree(sys, *child_pid, result);
        }
    }
}
