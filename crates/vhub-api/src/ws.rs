//! WebSocket bridge between clients and the broadcast manager.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};
use vhub_engine::{BroadcastManager, ConnectionId, EngineError};
use vhub_models::ServerMessage;

use crate::metrics;
use crate::state::AppState;

/// Global counter for active WebSocket connections.
static ACTIVE_WS_CONNECTIONS: AtomicI64 = AtomicI64::new(0);

const WS_SEND_BUFFER_SIZE: usize = 32;
const WS_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const WS_CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Upgrade to the analysis result stream.
pub async fn ws_analysis(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    metrics::record_ws_connection();
    let broadcast = Arc::clone(state.context.broadcast());
    ws.on_upgrade(move |socket| handle_analysis_socket(socket, broadcast))
}

async fn handle_analysis_socket(socket: WebSocket, broadcast: Arc<BroadcastManager>) {
    let active = ACTIVE_WS_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
    metrics::set_ws_active_connections(active);

    let (connection_id, outbound) = broadcast.connect().await;
    let (mut ws_sender, receiver) = socket.split();

    // Single writer task; everything bound for the socket goes through `tx`
    let (tx, mut rx) = mpsc::channel::<Message>(WS_SEND_BUFFER_SIZE);
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    run_session(&broadcast, connection_id, outbound, receiver, &tx).await;

    broadcast.disconnect(connection_id).await;
    drop(tx);
    let _ = send_task.await;

    let active = ACTIVE_WS_CONNECTIONS.fetch_sub(1, Ordering::SeqCst) - 1;
    metrics::set_ws_active_connections(active);
}

async fn run_session(
    broadcast: &BroadcastManager,
    connection_id: ConnectionId,
    mut outbound: mpsc::Receiver<ServerMessage>,
    mut receiver: futures_util::stream::SplitStream<WebSocket>,
    tx: &mpsc::Sender<Message>,
) {
    let mut heartbeat = interval(WS_HEARTBEAT_INTERVAL);
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else {
                    debug!(connection_id = %connection_id, "Outbound channel closed");
                    break;
                };
                let json = match message.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(connection_id = %connection_id, error = %e, "Failed to encode message");
                        continue;
                    }
                };
                metrics::record_ws_message_sent(message.message_type());
                if tx.send(Message::Text(json)).await.is_err() {
                    warn!(connection_id = %connection_id, "WebSocket send failed, client disconnected");
                    break;
                }
            }
            _ = heartbeat.tick() => {
                let idle = last_activity.elapsed();
                if idle > WS_CLIENT_TIMEOUT {
                    info!(connection_id = %connection_id, idle_secs = idle.as_secs(), "Client timed out");
                    break;
                }
                if idle > WS_HEARTBEAT_INTERVAL / 2 && tx.send(Message::Ping(Vec::new())).await.is_err() {
                    warn!(connection_id = %connection_id, "Heartbeat failed, client disconnected");
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        metrics::record_ws_message_received();
                        match broadcast.handle_client_text(connection_id, &text).await {
                            Ok(()) => {}
                            Err(EngineError::ConnectionNotFound(_)) => break,
                            Err(e) => warn!(connection_id = %connection_id, error = %e, "Client message failed"),
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        last_activity = Instant::now();
                        let error = ServerMessage::error("Binary messages are not supported");
                        if broadcast.send_to(connection_id, error).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        last_activity = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(connection_id = %connection_id, "Client closed connection");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(connection_id = %connection_id, error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }
        }
    }
}
