//! Core library for local dev-service supervision: service registry, liveness
//! probes, process lifecycle, and installation.

mod config;
mod definition;
mod error;
mod events;
mod install;
mod models;
mod probe;
mod registry;
mod supervisor;

pub use config::{Paths, SupervisorConfig};
pub use definition::{default_definitions, ServiceDefinition, ServiceKind};
pub use error::{Result, ServiceError};
pub use events::{EventBus, ServiceEvent};
pub use install::{
    rewrite_httpd_conf, rewrite_httpd_listen, DirectivePort, FirewallRule, HttpdConfig,
    InstallContext, InstallationCoordinator, LinkExecutable, PostInstallHook, PostInstallHooks,
};
pub use models::{DownloadProgress, OperationResult, ServiceState, ServiceStatus, SystemInfo};
pub use probe::{PortMonitor, PortProbe, ProcessProbe, SysinfoProcessProbe, TcpConnectProbe};
pub use registry::ServiceRegistry;
pub use supervisor::ServiceSupervisor;
