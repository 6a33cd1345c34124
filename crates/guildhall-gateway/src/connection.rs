use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use guildhall_types::events::GatewayEvent;

use crate::registry::SessionRegistry;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

type WsSender = futures_util::stream::SplitSink<WebSocket, Message>;

/// Handle a WebSocket whose token was already validated at the HTTP upgrade.
/// Sends Ready, then relays this user's pushes until either side goes away.
pub async fn handle_connection_authenticated(
    socket: WebSocket,
    registry: SessionRegistry,
    user_id: Uuid,
    username: String,
) {
    let (mut sender, mut receiver) = socket.split();

    info!("{} ({}) connected to gateway", username, user_id);

    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if !send_event(&mut sender, &ready).await {
        return;
    }

    let (conn_id, mut user_rx) = registry.register(user_id).await;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = user_rx.recv() => {
                    let Some(event) = event else { break };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // The gateway is push-only; inbound frames only matter for liveness.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Pong(_) => pong_flag_recv.store(true, Ordering::Release),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    registry.unregister(user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

/// Serialize and send one event. Returns false once the socket is unusable.
async fn send_event(sender: &mut WsSender, event: &GatewayEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to serialize gateway event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}
