//! WebSocket transport
//!
//! One reader task per connection plus one writer task draining that
//! connection's bounded outbound queue. Binary frames are opaque update
//! buffers for the relay; text frames are JSON control messages. Every
//! failure funnels into `Hub::disconnect`, which is idempotent, so racing
//! close/error/idle events tear a connection down exactly once.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::error::CollabError;
use crate::hub::Hub;
use crate::presence::PresenceUpdate;
use crate::protocol::{ClientMessage, Outbound};
use crate::registry::ConnectionId;
use crate::room::JoinProfile;
use collab_sync::SyncEngine;

/// Accept loop. Runs until the listener fails.
pub async fn serve<E: SyncEngine>(hub: Arc<Hub<E>>, listener: TcpListener) -> anyhow::Result<()> {
    tokio::spawn(reap_idle(hub.clone()));

    loop {
        let (stream, addr) = listener.accept().await?;
        tokio::spawn(handle_connection(hub.clone(), stream, addr));
    }
}

/// Periodically disconnect connections silent past the idle threshold.
async fn reap_idle<E: SyncEngine>(hub: Arc<Hub<E>>) {
    let timeout = hub.config().idle_timeout();
    let cadence = (timeout / 2).max(std::time::Duration::from_secs(1));
    let mut interval = tokio::time::interval(cadence);
    loop {
        interval.tick().await;
        for conn in hub.idle_connections() {
            tracing::info!(conn = %conn, "closing idle connection");
            hub.disconnect(conn);
        }
    }
}

async fn handle_connection<E: SyncEngine>(hub: Arc<Hub<E>>, stream: TcpStream, addr: SocketAddr) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!(%addr, error = %e, "websocket handshake failed");
            return;
        }
    };
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (tx, mut rx) = mpsc::channel::<Outbound>(hub.config().send_queue_capacity);
    let conn = hub.register(tx);
    tracing::info!(conn = %conn, %addr, "client connected");

    // Writer: drains the bounded queue into the socket. Ends when every
    // sender is dropped (disconnect) and closes the socket, which also
    // unblocks the reader of a silent peer.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let message = match frame.into_ws_message() {
                Ok(message) => message,
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode outbound frame");
                    continue;
                }
            };
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(WsMessage::Binary(bytes)) => {
                hub.registry().touch(conn);
                if let Err(e) = hub.apply_update(conn, bytes) {
                    // Contained to this connection: report and carry on.
                    tracing::warn!(conn = %conn, error = %e, "update dropped");
                    hub.notify_error(conn, &e);
                }
            }
            Ok(WsMessage::Text(text)) => {
                hub.registry().touch(conn);
                handle_control(&hub, conn, &text);
            }
            Ok(WsMessage::Close(_)) => break,
            // Protocol-level keepalives still count as activity.
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => hub.registry().touch(conn),
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn = %conn, error = %e, "websocket receive error");
                break;
            }
        }
    }

    hub.disconnect(conn);
    let _ = writer.await;
    tracing::info!(conn = %conn, %addr, "client disconnected");
}

fn handle_control<E: SyncEngine>(hub: &Hub<E>, conn: ConnectionId, text: &str) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(conn = %conn, error = %e, "unparseable control message");
            hub.notify_error(conn, &CollabError::Transport(format!("bad control message: {e}")));
            return;
        }
    };

    match message {
        ClientMessage::JoinRoom {
            room_id,
            user_id,
            name,
            color,
        } => {
            let profile = JoinProfile {
                user_id,
                name,
                color,
            };
            if let Err(e) = hub.join(conn, room_id, profile) {
                tracing::warn!(conn = %conn, error = %e, "join refused");
                hub.notify_error(conn, &e);
            }
        }
        ClientMessage::LeaveRoom => hub.leave_current(conn),
        ClientMessage::FileOperation { payload } => {
            if let Err(e) = hub.file_operation(conn, payload) {
                hub.notify_error(conn, &e);
            }
        }
        ClientMessage::SetPresence {
            cursor,
            typing,
            name,
            color,
        } => {
            let update = PresenceUpdate {
                cursor,
                typing,
                name,
                color,
            };
            if let Err(e) = hub.update_presence(conn, update) {
                hub.notify_error(conn, &e);
            }
        }
    }
}
