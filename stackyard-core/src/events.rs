//! Lifecycle notifications fanned out to observers.

use crate::models::{DownloadProgress, ServiceStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServiceEvent {
    ServiceStarted { name: String, status: ServiceStatus },
    ServiceStopped { name: String, status: ServiceStatus },
    ServiceStatusUpdated { name: String, status: ServiceStatus },
    ServiceError { name: String, error: String },
    DownloadProgress { name: String, progress: DownloadProgress },
}

impl ServiceEvent {
    pub fn name(&self) -> &str {
        match self {
            ServiceEvent::ServiceStarted { name, .. }
            | ServiceEvent::ServiceStopped { name, .. }
            | ServiceEvent::ServiceStatusUpdated { name, .. }
            | ServiceEvent::ServiceError { name, .. }
            | ServiceEvent::DownloadProgress { name, .. } => name,
        }
    }
}

/// 广播事件总线；没有订阅者时发送直接丢弃。
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ServiceEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ServiceEvent) {
        tracing::trace!(service = event.name(), ?event, "emit event");
        let _ = self.tx.send(event);
    }
}
