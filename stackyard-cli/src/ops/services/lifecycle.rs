//! Service lifecycle operations: start, stop, status, port change.

use crate::client::handle_error;
use crate::ops::output::{print_json, OutputFormat};
use crate::ops::ui::{
    finish_progress_error, finish_progress_success, format_state, format_uptime, print_error,
    print_header, print_hint, print_kv_colored, print_progress, print_section, report_result,
    KvColor,
};
use crossterm::style::Stylize;
use serde_json::json;
use stackyard_core::{OperationResult, ServiceState, ServiceStatus};

/// POST `/services/<name>/<action>` and render the returned status.
async fn lifecycle_call(
    client: &reqwest::Client,
    base: &str,
    name: &str,
    action: &str,
    output: OutputFormat,
) -> anyhow::Result<()> {
    let url = format!("{}/services/{}/{}", base, name, action);
    match output {
        OutputFormat::Json => {
            let resp = handle_error(client.post(url).send().await?).await?;
            let status: ServiceStatus = resp.json().await?;
            print_json(&status)?;
        }
        OutputFormat::Table => {
            let (title, progress, done) = match action {
                "start" => ("▶️  START SERVICE", "Starting service", "Service started"),
                _ => ("⏹️  STOP SERVICE", "Stopping service", "Service stopped"),
            };
            print_header(&format!("{}: {}", title, name.to_uppercase()));
            print_progress(progress);

            let resp = client.post(url).send().await?;
            match handle_error(resp).await {
                Ok(resp) => {
                    let status: ServiceStatus = resp.json().await?;
                    finish_progress_success(done);
                    print_service_status(&status);
                    println!();
                }
                Err(e) => {
                    finish_progress_error(&format!("Failed to {}", action));
                    println!();
                    print_error(&format!("{}", e));
                    return Err(e);
                }
            }
        }
    }
    Ok(())
}

pub async fn start_service(
    client: &reqwest::Client,
    base: &str,
    name: &str,
    output: OutputFormat,
) -> anyhow::Result<()> {
    lifecycle_call(client, base, name, "start", output).await
}

pub async fn stop_service(
    client: &reqwest::Client,
    base: &str,
    name: &str,
    output: OutputFormat,
) -> anyhow::Result<()> {
    lifecycle_call(client, base, name, "stop", output).await
}

/// Query status.
pub async fn status_service(
    client: &reqwest::Client,
    base: &str,
    name: &str,
    output: OutputFormat,
) -> anyhow::Result<()> {
    let url = format!("{}/services/{}/status", base, name);
    let resp = client.get(url).send().await?;
    let resp = handle_error(resp).await?;
    let status: ServiceStatus = resp.json().await?;

    match output {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => {
            print_header(&format!("📊 STATUS: {}", name.to_uppercase()));
            print_service_status(&status);
            println!();
            print_hint(&status_hint(name, status.state));
            println!();
        }
    }
    Ok(())
}

fn status_hint(name: &str, state: ServiceState) -> String {
    match state {
        s if s.is_transitional() => {
            format!("An operation is in progress, run 'status {}' again shortly", name)
        }
        ServiceState::Running => format!("Use 'stop {}' to stop it", name),
        ServiceState::Error => format!("Use 'stop {}' to clear the error state", name),
        _ => format!("Use 'start {}' to start the service", name),
    }
}

/// Change the listening port; a running service is restarted on the new port.
pub async fn update_port(
    client: &reqwest::Client,
    base: &str,
    name: &str,
    port: u16,
    output: OutputFormat,
) -> anyhow::Result<()> {
    let url = format!("{}/services/{}/port", base, name);
    let resp = client.put(url).json(&json!({ "port": port })).send().await?;
    let resp = handle_error(resp).await?;
    let result: OperationResult = resp.json().await?;

    match output {
        OutputFormat::Json => print_json(&result),
        OutputFormat::Table => {
            print_header(&format!("🔌 PORT: {} → {}", name.to_uppercase(), port));
            report_result(&result, "update port")
        }
    }
}

fn print_service_status(status: &ServiceStatus) {
    print_section("Service Status");
    println!("  {:<14} {}", "Status:".dark_grey(), format_state(status.state));

    if let Some(pid) = status.pid {
        print_kv_colored("PID", &pid.to_string(), KvColor::Cyan);
    }
    if let Some(port) = status.port {
        print_kv_colored("Port", &port.to_string(), KvColor::Cyan);
    }
    if let Some(uptime_ms) = status.uptime_ms {
        print_kv_colored("Uptime", &format_uptime(uptime_ms), KvColor::Green);
    }
    if let Some(err) = &status.last_error {
        print_kv_colored("Last Error", err, KvColor::Red);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_follows_state() {
        assert!(status_hint("redis", ServiceState::Starting).contains("in progress"));
        assert!(status_hint("redis", ServiceState::Stopping).contains("in progress"));
        assert!(status_hint("redis", ServiceState::Running).contains("stop redis"));
        assert!(status_hint("redis", ServiceState::Error).contains("clear the error"));
        assert!(status_hint("redis", ServiceState::Stopped).contains("start redis"));
    }
}
