//! Bulk actions and host overview.

use crate::client::handle_error;
use crate::ops::output::{print_json, OutputFormat};
use crate::ops::ui::{
    finish_progress_success, format_bytes, format_uptime, print_header, print_kv,
    print_kv_colored, print_progress, print_section, KvColor,
};
use serde_json::json;
use stackyard_core::SystemInfo;

async fn bulk(
    client: &reqwest::Client,
    base: &str,
    action: &str,
    label: &str,
    output: OutputFormat,
) -> anyhow::Result<()> {
    let url = format!("{}/actions/{}", base, action);
    if output == OutputFormat::Table {
        print_progress(label);
    }
    handle_error(client.post(url).send().await?).await?;
    match output {
        OutputFormat::Json => print_json(&json!({ "success": true }))?,
        OutputFormat::Table => finish_progress_success(&format!("{label}: done")),
    }
    Ok(())
}

/// 启动所有 auto_start 服务（失败只在服务端日志中体现）
pub async fn start_all(
    client: &reqwest::Client,
    base: &str,
    output: OutputFormat,
) -> anyhow::Result<()> {
    bulk(client, base, "start-all", "Starting auto-start services", output).await
}

pub async fn stop_all(
    client: &reqwest::Client,
    base: &str,
    output: OutputFormat,
) -> anyhow::Result<()> {
    bulk(client, base, "stop-all", "Stopping all services", output).await
}

pub async fn system_info(
    client: &reqwest::Client,
    base: &str,
    output: OutputFormat,
) -> anyhow::Result<()> {
    let url = format!("{}/system", base);
    let resp = handle_error(client.get(url).send().await?).await?;
    let info: SystemInfo = resp.json().await?;

    match output {
        OutputFormat::Json => print_json(&info)?,
        OutputFormat::Table => {
            print_header("🖥️  SYSTEM");

            print_section("Host");
            let unknown = || "unknown".to_string();
            let hostname = info.hostname.clone().unwrap_or_else(unknown);
            print_kv_colored("Hostname", &hostname, KvColor::White);
            print_kv(
                "OS",
                &format!(
                    "{} {} ({})",
                    info.os.clone().unwrap_or_else(unknown),
                    info.os_version.clone().unwrap_or_default(),
                    info.arch
                ),
            );
            print_kv("Uptime", &format_uptime(info.uptime_secs * 1000));
            print_kv("CPUs", &info.cpu_count.to_string());
            print_kv(
                "Memory",
                &format!(
                    "{} / {}",
                    format_bytes(info.used_memory),
                    format_bytes(info.total_memory)
                ),
            );
            print_kv_colored("Home", &info.home, KvColor::Cyan);

            print_section("Services");
            print_kv("Total", &info.services_total.to_string());
            let installed = info.services_installed.to_string();
            print_kv_colored("Installed", &installed, KvColor::Yellow);
            print_kv_colored("Running", &info.services_running.to_string(), KvColor::Green);
            println!();
        }
    }
    Ok(())
}
