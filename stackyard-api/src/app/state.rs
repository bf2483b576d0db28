use stackyard_core::{InstallationCoordinator, ServiceSupervisor};

/// Shared application state for handlers.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: ServiceSupervisor,
    pub installer: InstallationCoordinator,
    /// Bearer token（None 时不做认证）
    pub token: Option<String>,
}
