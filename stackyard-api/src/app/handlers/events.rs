//! WebSocket event stream
//!
//! 每个 `ServiceEvent` 作为一条 JSON Text 消息推送；客户端发来的消息除 Ping/Close 外忽略。

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::stream::StreamExt;
use futures::SinkExt;
use stackyard_core::ServiceEvent;
use tokio::sync::broadcast;

use crate::app::AppState;

/// GET /events - 订阅服务事件
pub async fn stream_events(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    // 在 upgrade 之前订阅，避免握手期间丢事件
    let events = state.supervisor.events();
    ws.on_upgrade(move |socket| handle_socket(socket, events))
}

async fn handle_socket(socket: WebSocket, mut events: broadcast::Receiver<ServiceEvent>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let text = match serde_json::to_string(&event) {
                            Ok(text) => text,
                            Err(e) => {
                                tracing::warn!(error = %e, "failed to encode event");
                                continue;
                            }
                        };
                        if ws_tx.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // 客户端太慢，丢弃了一些事件
                        tracing::debug!(skipped = n, "event subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
    let _ = ws_tx.close().await;
}
