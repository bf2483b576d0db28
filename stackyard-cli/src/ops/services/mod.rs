//! Service queries: list and detail.

mod lifecycle;

use super::output::{print_json, OutputFormat};
use super::ui::{
    format_state, print_empty, print_header, print_hint, print_kv, print_kv_colored,
    print_section, print_table_header, KvColor,
};
use crate::client::handle_error;
use crossterm::style::Stylize;
use stackyard_core::{ServiceDefinition, ServiceStatus};

pub use lifecycle::{start_service, status_service, stop_service, update_port};

/// Which subset `list` fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFilter {
    All,
    Installed,
    Running,
}

impl ListFilter {
    fn path(self) -> &'static str {
        match self {
            ListFilter::All => "services",
            ListFilter::Installed => "services/installed",
            ListFilter::Running => "services/running",
        }
    }
}

pub async fn list_services(
    client: &reqwest::Client,
    base: &str,
    filter: ListFilter,
    output: OutputFormat,
) -> anyhow::Result<()> {
    let url = format!("{}/{}", base, filter.path());
    let resp = client.get(url).send().await?;
    let resp = handle_error(resp).await?;
    let services: Vec<ServiceDefinition> = resp.json().await?;

    match output {
        OutputFormat::Json => print_json(&services)?,
        OutputFormat::Table => {
            print_header("📋 SERVICE LIST");

            if services.is_empty() {
                print_empty("No services match.");
                return Ok(());
            }

            let installed = services.iter().filter(|s| s.installed).count();
            println!(
                "  Total: {}  |  {} Installed",
                services.len().to_string().white().bold(),
                installed.to_string().green(),
            );
            println!();

            print_table_header(&[
                ("NAME", 14),
                ("KIND", 10),
                ("PORT", 7),
                ("INSTALLED", 10),
                ("AUTO", 5),
            ]);
            for svc in &services {
                // 先补齐宽度再着色，带样式的内容不参与对齐
                let name = format!("{:<14}", svc.name);
                let name = if svc.enabled { name.cyan() } else { name.dark_grey() };
                let port = svc.port.map(|p| p.to_string()).unwrap_or_else(|| "-".into());
                let installed = if svc.installed {
                    format!("{:<10}", "yes").green()
                } else {
                    format!("{:<10}", "no").dark_grey()
                };
                println!(
                    "  {} {:<10} {:<7} {} {:<5}",
                    name,
                    format!("{:?}", svc.kind).to_lowercase(),
                    port,
                    installed,
                    if svc.auto_start { "yes" } else { "-" }
                );
            }
            println!();
            print_hint("Use 'get <name>' to see details and live status");
        }
    }
    Ok(())
}

#[derive(serde::Deserialize, serde::Serialize)]
struct ServiceDetail {
    definition: ServiceDefinition,
    status: ServiceStatus,
}

/// Definition + live status.
pub async fn get_service(
    client: &reqwest::Client,
    base: &str,
    name: &str,
    output: OutputFormat,
) -> anyhow::Result<()> {
    let url = format!("{}/services/{}", base, name);
    let resp = client.get(url).send().await?;
    let resp = handle_error(resp).await?;
    let detail: ServiceDetail = resp.json().await?;

    match output {
        OutputFormat::Json => print_json(&detail)?,
        OutputFormat::Table => {
            let def = &detail.definition;
            print_header(&format!("📦 SERVICE: {}", name.to_uppercase()));

            print_section("Configuration");
            let display = if def.display_name.is_empty() { &def.name } else { &def.display_name };
            print_kv_colored("Name", display, KvColor::White);
            if !def.description.is_empty() {
                print_kv("Description", &def.description);
            }
            print_kv_colored("Executable", &def.executable, KvColor::Yellow);
            if !def.args.is_empty() {
                print_kv("Arguments", &def.args.join(" "));
            }
            if let Some(port) = def.port {
                print_kv_colored("Port", &port.to_string(), KvColor::Cyan);
            }
            if let Some(dir) = &def.install_dir {
                print_kv_colored("Install Dir", &dir.display().to_string(), KvColor::Cyan);
            }
            if let Some(config) = &def.config_path {
                print_kv("Config", &config.display().to_string());
            }
            if let Some(version) = &def.version {
                print_kv("Version", version);
            }
            let flag = |on: bool| if on { KvColor::Green } else { KvColor::Red };
            print_kv_colored("Installed", &def.installed.to_string(), flag(def.installed));
            print_kv_colored("Enabled", &def.enabled.to_string(), flag(def.enabled));
            print_kv("Auto Start", &def.auto_start.to_string());

            print_section("Status");
            println!("  {:<14} {}", "State:".dark_grey(), format_state(detail.status.state));
            if let Some(pid) = detail.status.pid {
                print_kv_colored("PID", &pid.to_string(), KvColor::Cyan);
            }
            if let Some(err) = &detail.status.last_error {
                print_kv_colored("Last Error", err, KvColor::Red);
            }
            println!();
        }
    }
    Ok(())
}
