//! 状态读取：端口与 PID 两种方式校正记录的状态。

use super::*;
use tracing::{instrument, warn};

/// What reconciliation decided, applied under the runtime lock.
enum Verdict {
    Keep,
    Running { pid: Option<u32> },
    Stopped,
    Orphaned { port: u16 },
}

impl ServiceSupervisor {
    /// Current status of `name`.
    ///
    /// While another operation holds the service lock the recorded status
    /// (possibly `starting`/`stopping`) is returned without probing.
    #[instrument(skip(self))]
    pub async fn status(&self, name: &str) -> Result<ServiceStatus> {
        let def = self.registry.get(name).await?;
        let lock = self.op_lock(name);
        let Ok(_guard) = lock.try_lock() else {
            return Ok(self.recorded(&def));
        };
        Ok(self.reconcile(&def).await)
    }

    /// Reconcile recorded state with port occupancy and PID liveness.
    /// Callers hold the service lock.
    pub(super) async fn reconcile(&self, def: &ServiceDefinition) -> ServiceStatus {
        let freshness = self.config.status_freshness;
        let (recorded, held) = self.with_runtime(&def.name, |state| {
            let fresh = state
                .last_check
                .map(|at| at.elapsed() < freshness)
                .unwrap_or(false);
            (
                (state.status.clone(), fresh),
                state.handle.as_ref().map(|h| (h.pid, h.generation, h.started_at)),
            )
        });
        let (recorded, fresh) = recorded;

        if recorded.state == ServiceState::Running && fresh {
            return self.recorded(def);
        }
        // error 只能由显式 start/stop 离开
        if recorded.state == ServiceState::Error {
            return self.recorded(def);
        }

        let held_alive = match held {
            Some((pid, _, _)) => Some(self.processes.is_alive(pid).await),
            None => None,
        };

        let verdict = match def.port {
            Some(port) => {
                let in_use = self.ports.is_in_use(port).await;
                match (in_use, held_alive) {
                    (true, Some(false)) => Verdict::Orphaned { port },
                    (true, _) => Verdict::Running {
                        pid: held.map(|(pid, _, _)| pid),
                    },
                    (false, Some(true)) => Verdict::Keep,
                    (false, _) => Verdict::Stopped,
                }
            }
            None => match held_alive {
                Some(true) => Verdict::Running {
                    pid: held.map(|(pid, _, _)| pid),
                },
                Some(false) => Verdict::Stopped,
                None => Verdict::Keep,
            },
        };

        let generation = held.map(|(_, generation, _)| generation);
        let handle_started = held.map(|(_, _, at)| at);
        self.with_runtime(&def.name, |state| {
            let before = state.status.state;
            state.status.port = def.port;
            state.last_check = Some(Instant::now());
            let notify = match verdict {
                Verdict::Keep => None,
                Verdict::Running { pid } => {
                    state.status.state = ServiceState::Running;
                    state.status.pid = pid;
                    if before != ServiceState::Running {
                        state.status.started_at = handle_started.or_else(|| Some(Utc::now()));
                    }
                    state.status.last_error = None;
                    Some(Notify::Updated)
                }
                Verdict::Stopped => {
                    release(state, generation);
                    state.status = ServiceStatus::stopped(&def.name, def.port);
                    Some(Notify::Updated)
                }
                Verdict::Orphaned { port } => {
                    warn!(service = %def.name, port, "process gone but port still held");
                    release(state, generation);
                    state.status.state = ServiceState::Error;
                    state.status.pid = None;
                    state.status.started_at = None;
                    state.status.last_error = Some(
                        ServiceError::OrphanedPort {
                            name: def.name.clone(),
                            port,
                        }
                        .to_string(),
                    );
                    Some(Notify::Error)
                }
            };
            state.status.refresh_uptime();
            let status = state.status.clone();
            if let Some(notify) = notify {
                if status.state != before {
                    self.notify(&def.name, notify, &status);
                }
            }
            status
        })
    }
}

/// Drop a stale handle, unless it was replaced in the meantime.
pub(super) fn release(state: &mut RuntimeState, generation: Option<u64>) {
    if state.handle.as_ref().map(|h| h.generation) == generation {
        state.handle = None;
    }
}
