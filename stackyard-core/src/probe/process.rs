use async_trait::async_trait;
use std::sync::{Arc, Mutex as StdMutex};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, System};

/// "Is OS process `pid` alive?"
#[async_trait]
pub trait ProcessProbe: Send + Sync + std::fmt::Debug {
    async fn is_alive(&self, pid: u32) -> bool;
}

/// 基于 sysinfo 进程表；僵尸进程视为已退出。
#[derive(Debug, Clone)]
pub struct SysinfoProcessProbe {
    system: Arc<StdMutex<System>>,
}

impl Default for SysinfoProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoProcessProbe {
    pub fn new() -> Self {
        Self {
            system: Arc::new(StdMutex::new(System::new())),
        }
    }
}

fn alive_blocking(system: &StdMutex<System>, pid: u32) -> bool {
    let mut sys = match system.lock() {
        Ok(guard) => guard,
        Err(_) => return false,
    };
    let pid = Pid::from(pid as usize);
    // 只刷新目标进程
    if !sys.refresh_process_specifics(pid, ProcessRefreshKind::new()) {
        return false;
    }
    sys.process(pid)
        .map(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
        .unwrap_or(false)
}

#[async_trait]
impl ProcessProbe for SysinfoProcessProbe {
    async fn is_alive(&self, pid: u32) -> bool {
        let system = self.system.clone();
        tokio::task::spawn_blocking(move || alive_blocking(&system, pid))
            .await
            .unwrap_or(false)
    }
}
