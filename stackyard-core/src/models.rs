use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// Runtime state enumeration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl ServiceState {
    /// 过渡状态：starting / stopping
    pub fn is_transitional(self) -> bool {
        matches!(self, ServiceState::Starting | ServiceState::Stopping)
    }
}

/// Detailed status for a service.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceStatus {
    pub name: String,
    pub state: ServiceState,
    pub pid: Option<u32>,
    pub port: Option<u16>,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_ms: Option<u64>,
    pub last_error: Option<String>,
}

impl ServiceStatus {
    pub fn stopped(name: &str, port: Option<u16>) -> Self {
        Self {
            name: name.to_string(),
            state: ServiceState::Stopped,
            pid: None,
            port,
            started_at: None,
            uptime_ms: None,
            last_error: None,
        }
    }

    /// Recompute `uptime_ms` from `started_at`.
    pub fn refresh_uptime(&mut self) {
        self.uptime_ms = match (self.state, self.started_at) {
            (ServiceState::Running, Some(at)) => {
                Some((Utc::now() - at).num_milliseconds().max(0) as u64)
            }
            _ => None,
        };
    }
}

/// Outcome of operations that report success without failing the call.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationResult {
    pub success: bool,
    pub message: Option<String>,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DownloadProgress {
    pub downloaded: u64,
    /// 0 when the server sent no content length.
    pub total: u64,
    pub percentage: u8,
}

impl DownloadProgress {
    pub fn new(downloaded: u64, total: u64) -> Self {
        let percentage = if total == 0 {
            0
        } else {
            ((downloaded.min(total) * 100) / total) as u8
        };
        Self {
            downloaded,
            total,
            percentage,
        }
    }
}

/// Host overview.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub hostname: Option<String>,
    pub arch: String,
    pub uptime_secs: u64,
    pub cpu_count: usize,
    pub total_memory: u64,
    pub used_memory: u64,
    pub home: String,
    pub services_total: usize,
    pub services_installed: usize,
    pub services_running: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_starting_and_stopping_are_transitional() {
        assert!(ServiceState::Starting.is_transitional());
        assert!(ServiceState::Stopping.is_transitional());
        assert!(!ServiceState::Running.is_transitional());
        assert!(!ServiceState::Stopped.is_transitional());
        assert!(!ServiceState::Error.is_transitional());
    }

    #[test]
    fn status_omits_empty_fields() {
        let status = ServiceStatus::stopped("redis", Some(6379));
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "stopped");
        assert_eq!(json["port"], 6379);
        assert!(json.get("pid").is_none());
        assert!(json.get("last_error").is_none());
    }

    #[test]
    fn uptime_only_for_running() {
        let mut status = ServiceStatus::stopped("redis", None);
        status.started_at = Some(Utc::now() - chrono::Duration::seconds(2));
        status.refresh_uptime();
        assert_eq!(status.uptime_ms, None);

        status.state = ServiceState::Running;
        status.refresh_uptime();
        assert!(status.uptime_ms.unwrap() >= 2000);
    }

    #[test]
    fn progress_percentage() {
        assert_eq!(DownloadProgress::new(50, 200).percentage, 25);
        assert_eq!(DownloadProgress::new(10, 0).percentage, 0);
        assert_eq!(DownloadProgress::new(300, 200).percentage, 100);
    }
}
