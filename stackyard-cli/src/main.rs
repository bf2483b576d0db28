mod client;
mod ops;

use clap::{Parser, Subcommand};
use ops::{
    download_service, get_service, install_service, list_services, start_all, start_service,
    status_service, stop_all, stop_service, system_info, update_port, watch_events, ListFilter,
    OutputFormat,
};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI wrapper around the stackyard daemon's HTTP API.
#[derive(Parser)]
#[command(name = "sy", author, version, about = "Manage local dev services through stackyardd")]
struct Cli {
    /// API base url
    #[arg(long, env = "SY_API_BASE", default_value = "http://127.0.0.1:7878")]
    api_base: String,

    /// Bearer token for authentication
    #[arg(long, env = "SY_TOKEN")]
    token: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List service definitions
    List {
        /// 只显示已安装的服务
        #[arg(long, conflicts_with = "running")]
        installed: bool,
        /// 只显示运行中的服务
        #[arg(long)]
        running: bool,
    },
    /// Show definition + live status
    Get { name: String },
    /// Show live status
    Status { name: String },
    /// Start a service and wait until it is running
    Start { name: String },
    /// Stop a service
    Stop { name: String },
    /// Start every enabled auto-start service
    StartAll,
    /// Stop everything we are running
    StopAll,
    /// Change a service's port (restarts it if running)
    Port { name: String, port: u16 },
    /// Download a service's installer/archive
    Download { name: String },
    /// Install from a downloaded artifact
    Install {
        name: String,
        /// 绝对路径，或相对于 <home>/downloads
        path: PathBuf,
    },
    /// Follow lifecycle events (WebSocket)
    Events,
    /// Host and service overview
    System,
}

impl Commands {
    fn list_filter(installed: bool, running: bool) -> ListFilter {
        if installed {
            ListFilter::Installed
        } else if running {
            ListFilter::Running
        } else {
            ListFilter::All
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载 .env 文件（如果存在），忽略错误
    let _ = dotenvy::dotenv();
    init_tracing();
    let cli = Cli::parse();
    let client = client::build_client(&cli.token)?;
    let base = cli.api_base.trim_end_matches('/');

    match cli.command {
        Commands::List { installed, running } => {
            let filter = Commands::list_filter(installed, running);
            list_services(&client, base, filter, cli.output).await?
        }
        Commands::Get { name } => get_service(&client, base, &name, cli.output).await?,
        Commands::Status { name } => status_service(&client, base, &name, cli.output).await?,
        Commands::Start { name } => start_service(&client, base, &name, cli.output).await?,
        Commands::Stop { name } => stop_service(&client, base, &name, cli.output).await?,
        Commands::StartAll => start_all(&client, base, cli.output).await?,
        Commands::StopAll => stop_all(&client, base, cli.output).await?,
        Commands::Port { name, port } => {
            update_port(&client, base, &name, port, cli.output).await?
        }
        Commands::Download { name } => {
            download_service(&client, base, &name, cli.output).await?
        }
        Commands::Install { name, path } => {
            install_service(&client, base, &name, &path, cli.output).await?
        }
        Commands::Events => watch_events(base, cli.token.as_deref(), cli.output).await?,
        Commands::System => system_info(&client, base, cli.output).await?,
    }

    Ok(())
}

fn init_tracing() {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
