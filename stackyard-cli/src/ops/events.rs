//! Follow the daemon's event stream over WebSocket.

use crate::client::build_ws_url;
use crate::ops::output::OutputFormat;
use crate::ops::ui::format_state;
use crossterm::style::Stylize;
use futures::{SinkExt, StreamExt};
use stackyard_core::ServiceEvent;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message},
};

/// Print events until the server closes the stream or Ctrl+C.
pub async fn watch_events(
    base: &str,
    token: Option<&str>,
    output: OutputFormat,
) -> anyhow::Result<()> {
    let ws_url = build_ws_url(base, "events");
    let mut request = ws_url.into_client_request()?;
    request
        .headers_mut()
        .insert("User-Agent", "stackyard-cli".parse()?);
    if let Some(tok) = token {
        request
            .headers_mut()
            .insert("Authorization", format!("Bearer {}", tok).parse()?);
    }

    let (ws_stream, _resp) = connect_async(request).await?;
    if output == OutputFormat::Table {
        println!("# watching events on {}. Ctrl+C exits.", base);
    }
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match output {
                        OutputFormat::Json => println!("{}", text),
                        OutputFormat::Table => match serde_json::from_str::<ServiceEvent>(&text) {
                            Ok(event) => println!("{}", describe(&event)),
                            Err(e) => tracing::debug!(error = %e, "unrecognised event: {}", text),
                        },
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => return Err(e.into()),
                    _ => {}
                }
            }
        }
    }
    Ok(())
}

/// One line per event.
fn describe(event: &ServiceEvent) -> String {
    let name = format!("{:<12}", event.name()).cyan();
    match event {
        ServiceEvent::ServiceStarted { status, .. } => {
            let pid = status.pid.map(|p| format!(" pid {}", p)).unwrap_or_default();
            format!("  {} started  {}{}", name, format_state(status.state), pid)
        }
        ServiceEvent::ServiceStopped { status, .. } => {
            format!("  {} stopped  {}", name, format_state(status.state))
        }
        ServiceEvent::ServiceStatusUpdated { status, .. } => {
            format!("  {} status   {}", name, format_state(status.state))
        }
        ServiceEvent::ServiceError { error, .. } => {
            format!("  {} error    {}", name, error.as_str().red())
        }
        ServiceEvent::DownloadProgress { progress, .. } => format!(
            "  {} download {:>3}% ({}/{} bytes)",
            name, progress.percentage, progress.downloaded, progress.total
        ),
    }
}
