use thiserror::Error;

/// Common result type for core operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service not found: {0}")]
    NotFound(String),
    #[error("service is disabled: {0}")]
    Disabled(String),
    #[error("service is not installed: {0}")]
    NotInstalled(String),
    #[error("service already running: {0}")]
    AlreadyRunning(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),
    #[error("process exited but port {port} is still held (service {name})")]
    OrphanedPort { name: String, port: u16 },
    #[error("forced kill failed: {0}")]
    ForceKillFailed(String),
    #[error("download failed: {0}")]
    Download(String),
    #[error("install failed: {0}")]
    Install(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("other error: {0}")]
    Other(String),
}
