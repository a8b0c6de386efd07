//! Per-connection WebSocket task
//!
//! The socket is split: a writer task drains the peer's bounded outbound
//! queue into the socket, while this task reads frames and feeds them to the
//! dispatcher. Either side ending tears the connection down.

use axum::extract::ws::{Message as WsMessage, WebSocket};
use chatcast_core::chat::{ConnectionId, OutboundEvent};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::protocol::{self, Inbound};
use crate::state::{AppState, ConnectionGuard};

pub async fn handle_connection(
    socket: WebSocket,
    state: AppState,
    identity: Option<String>,
    _guard: ConnectionGuard,
) {
    let id = ConnectionId::new();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (events_tx, mut events_rx) = mpsc::channel::<OutboundEvent>(state.config.peer_buffer);

    info!(connection = %id, identity = ?identity, open = state.open_connections(), "Peer connected");

    if state
        .dispatcher
        .connect(id, Box::new(events_tx), identity)
        .await
        .is_err()
    {
        warn!(connection = %id, "Dispatcher unavailable, closing socket");
        let _ = ws_tx.close().await;
        return;
    }

    let mut writer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let text = match protocol::encode(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!(connection = %id, event = event.name(), "Failed to encode event: {}", e);
                    continue;
                }
            };
            if ws_tx.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let mut shutdown_rx = state.shutdown.subscribe();

    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            _ = &mut writer => {
                debug!(connection = %id, "Writer finished");
                break;
            }
            _ = shutdown_rx.recv() => {
                debug!(connection = %id, "Closing on shutdown");
                break;
            }
        };

        let text = match frame {
            Some(Ok(WsMessage::Text(text))) => text,
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!(connection = %id, "Socket error: {}", e);
                break;
            }
        };

        let sent = match protocol::decode(&text) {
            Ok(Inbound::Chat(submission)) => state.dispatcher.submit(id, submission).await,
            Ok(Inbound::Ephemeral { name, payload }) => state.dispatcher.relay(id, name, payload).await,
            Err(e) => {
                warn!(connection = %id, "Dropping frame: {}", e);
                continue;
            }
        };
        if sent.is_err() {
            warn!(connection = %id, "Dispatcher stopped");
            break;
        }
    }

    let _ = state.dispatcher.disconnect(id).await;
    writer.abort();
    info!(connection = %id, "Peer disconnected");
}
