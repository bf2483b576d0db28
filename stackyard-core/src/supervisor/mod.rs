//! Service process supervisor: per-service serialized start/stop, exit
//! watching, and port/PID reconciliation.

use crate::config::{Paths, SupervisorConfig};
use crate::definition::ServiceDefinition;
use crate::error::{Result, ServiceError};
use crate::events::{EventBus, ServiceEvent};
use crate::install::PostInstallHooks;
use crate::models::{ServiceState, ServiceStatus};
use crate::probe::{PortMonitor, PortProbe, ProcessProbe, SysinfoProcessProbe, TcpConnectProbe};
use crate::registry::ServiceRegistry;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use sysinfo::System;
use tokio::sync::{broadcast, watch, Mutex};

mod lifecycle;
mod reconcile;
mod signal;
mod spawn;
mod system;

/// How a supervised child ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ExitOutcome {
    Exited(Option<i32>),
    Failed(String),
}

impl std::fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitOutcome::Exited(Some(code)) => write!(f, "exit code {code}"),
            ExitOutcome::Exited(None) => write!(f, "terminated by signal"),
            ExitOutcome::Failed(e) => write!(f, "wait failed: {e}"),
        }
    }
}

/// 当前 supervisor 持有的子进程句柄。
#[derive(Debug)]
struct ProcessHandle {
    pid: u32,
    /// Distinguishes this spawn from later ones of the same service.
    generation: u64,
    started_at: DateTime<Utc>,
    /// start 确认成功后置为 true；之前的退出由 start 自己处理。
    confirmed: bool,
    /// stop 主动终止时置为 true；退出由 stop 自己处理。
    stop_requested: bool,
    exited: watch::Receiver<Option<ExitOutcome>>,
}

#[derive(Debug)]
struct RuntimeState {
    status: ServiceStatus,
    handle: Option<ProcessHandle>,
    last_check: Option<Instant>,
}

impl RuntimeState {
    fn new(name: &str) -> Self {
        Self {
            status: ServiceStatus::stopped(name, None),
            handle: None,
            last_check: None,
        }
    }
}

/// Which event accompanies a status write.
#[derive(Debug, Clone, Copy)]
enum Notify {
    Started,
    Stopped,
    Updated,
    Error,
}

/// Owns the runtime status of every service. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ServiceSupervisor {
    registry: ServiceRegistry,
    config: SupervisorConfig,
    ports: PortMonitor,
    processes: Arc<dyn ProcessProbe>,
    hooks: Arc<PostInstallHooks>,
    events: EventBus,
    locks: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
    runtime: Arc<StdMutex<HashMap<String, RuntimeState>>>,
    system: Arc<StdMutex<System>>,
    generation: Arc<AtomicU64>,
}

impl ServiceSupervisor {
    pub fn new(registry: ServiceRegistry, config: SupervisorConfig) -> Self {
        let probe = Arc::new(TcpConnectProbe::new(config.port_probe_timeout));
        Self {
            ports: PortMonitor::new(probe, config.port_cache_ttl),
            processes: Arc::new(SysinfoProcessProbe::new()),
            hooks: Arc::new(PostInstallHooks::defaults()),
            events: EventBus::new(),
            locks: Arc::new(StdMutex::new(HashMap::new())),
            runtime: Arc::new(StdMutex::new(HashMap::new())),
            system: Arc::new(StdMutex::new(System::new())),
            generation: Arc::new(AtomicU64::new(0)),
            registry,
            config,
        }
    }

    pub fn with_port_probe(mut self, probe: Arc<dyn PortProbe>) -> Self {
        self.ports = PortMonitor::new(probe, self.config.port_cache_ttl);
        self
    }

    pub fn with_process_probe(mut self, probe: Arc<dyn ProcessProbe>) -> Self {
        self.processes = probe;
        self
    }

    pub fn with_hooks(mut self, hooks: PostInstallHooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn paths(&self) -> &Paths {
        self.registry.paths()
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn ports(&self) -> &PortMonitor {
        &self.ports
    }

    pub fn hooks(&self) -> &PostInstallHooks {
        &self.hooks
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.events
    }

    pub fn events(&self) -> broadcast::Receiver<ServiceEvent> {
        self.events.subscribe()
    }

    /// Per-name async operation lock.
    fn op_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Run `f` against the service's runtime entry. Never held across `.await`.
    fn with_runtime<R>(&self, name: &str, f: impl FnOnce(&mut RuntimeState) -> R) -> R {
        let mut runtime = self.runtime.lock().unwrap_or_else(|e| e.into_inner());
        let state = runtime
            .entry(name.to_string())
            .or_insert_with(|| RuntimeState::new(name));
        f(state)
    }

    /// Mutate the status and emit the matching event under the same lock,
    /// so events leave in transition order.
    fn transition(
        &self,
        name: &str,
        notify: Notify,
        f: impl FnOnce(&mut RuntimeState),
    ) -> ServiceStatus {
        self.with_runtime(name, |state| {
            f(state);
            state.status.refresh_uptime();
            let status = state.status.clone();
            self.notify(name, notify, &status);
            status
        })
    }

    fn notify(&self, name: &str, notify: Notify, status: &ServiceStatus) {
        let name = name.to_string();
        let event = match notify {
            Notify::Started => ServiceEvent::ServiceStarted {
                name,
                status: status.clone(),
            },
            Notify::Stopped => ServiceEvent::ServiceStopped {
                name,
                status: status.clone(),
            },
            Notify::Updated => ServiceEvent::ServiceStatusUpdated {
                name,
                status: status.clone(),
            },
            Notify::Error => ServiceEvent::ServiceError {
                name,
                error: status.last_error.clone().unwrap_or_default(),
            },
        };
        self.events.emit(event);
    }

    /// Record a failed operation: `error` with message, `service-error` event.
    fn fail(&self, def: &ServiceDefinition, err: &ServiceError) -> ServiceStatus {
        tracing::error!(service = %def.name, error = %err, "operation failed");
        self.transition(&def.name, Notify::Error, |state| {
            state.status.state = ServiceState::Error;
            state.status.pid = state.handle.as_ref().map(|h| h.pid);
            state.status.port = def.port;
            state.status.last_error = Some(err.to_string());
            state.last_check = Some(Instant::now());
        })
    }

    /// Status as recorded, without probing.
    fn recorded(&self, def: &ServiceDefinition) -> ServiceStatus {
        self.with_runtime(&def.name, |state| {
            if state.status.port.is_none() {
                state.status.port = def.port;
            }
            state.status.refresh_uptime();
            state.status.clone()
        })
    }

    fn has_handle(&self, name: &str) -> bool {
        self.with_runtime(name, |state| state.handle.is_some())
    }
}
