//! Download and install.

use crate::client::handle_error;
use crate::ops::output::{print_json, OutputFormat};
use crate::ops::ui::{print_header, print_hint, print_progress, report_result};
use serde_json::json;
use stackyard_core::OperationResult;
use std::path::Path;

pub async fn download_service(
    client: &reqwest::Client,
    base: &str,
    name: &str,
    output: OutputFormat,
) -> anyhow::Result<()> {
    let url = format!("{}/services/{}/download", base, name);
    if output == OutputFormat::Table {
        print_header(&format!("⬇️  DOWNLOAD: {}", name.to_uppercase()));
        print_progress("Downloading (run 'events' in another shell for progress)");
        println!();
    }
    let resp = handle_error(client.post(url).send().await?).await?;
    let result: OperationResult = resp.json().await?;

    match output {
        OutputFormat::Json => print_json(&result),
        OutputFormat::Table => {
            report_result(&result, "download")?;
            if let Some(path) = &result.message {
                print_hint(&format!("Use 'install {} {}' to install it", name, path));
            }
            Ok(())
        }
    }
}

pub async fn install_service(
    client: &reqwest::Client,
    base: &str,
    name: &str,
    artifact: &Path,
    output: OutputFormat,
) -> anyhow::Result<()> {
    let url = format!("{}/services/{}/install", base, name);
    let body = json!({ "artifact_path": artifact });
    let resp = handle_error(client.post(url).json(&body).send().await?).await?;
    let result: OperationResult = resp.json().await?;

    match output {
        OutputFormat::Json => print_json(&result),
        OutputFormat::Table => {
            print_header(&format!("📦 INSTALL: {}", name.to_uppercase()));
            report_result(&result, "install")
        }
    }
}
