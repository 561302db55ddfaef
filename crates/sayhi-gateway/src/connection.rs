use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use sayhi_db::Database;
use sayhi_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a pre-authenticated WebSocket connection.
/// The session token was already resolved at the HTTP upgrade layer, so the
/// connection goes straight to Ready + event loop.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    user_id: Uuid,
    full_name: String,
) {
    let (mut sender, mut receiver) = socket.split();

    info!("{} ({}) connected to gateway", full_name, user_id);

    let Some(ready) = encode(&GatewayEvent::Ready { user_id }) else {
        return;
    };
    if sender.send(ready).await.is_err() {
        return;
    }

    // Subscribe before registering so this client also gets the roster
    // that announces it.
    let mut broadcast_rx = dispatcher.subscribe();
    let (conn_id, mut user_rx) = dispatcher.connect(user_id).await;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    let Some(msg) = encode(&event) else { continue };
                    if sender.send(msg).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    // None: the registry dropped us for a newer connection
                    let Some(event) = result else { break };

                    let Some(msg) = encode(&event) else { continue };
                    if sender.send(msg).await.is_err() {
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
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }

        let _ = sender.send(Message::Close(None)).await;
    });

    // Read commands from client
    let dispatcher_recv = dispatcher.clone();
    let name_recv = full_name.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(&dispatcher_recv, user_id, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            name_recv,
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    if dispatcher.disconnect(user_id, conn_id).await {
        record_last_seen(db, user_id);
        info!("{} ({}) disconnected from gateway", full_name, user_id);
    } else {
        info!("{} ({}) superseded connection closed", full_name, user_id);
    }
}

async fn handle_command(dispatcher: &Dispatcher, user_id: Uuid, cmd: GatewayCommand) {
    match cmd {
        GatewayCommand::Typing { receiver_id } => {
            trace!("{} typing -> {}", user_id, receiver_id);
            dispatcher
                .send_to_user(receiver_id, GatewayEvent::UserTyping { sender_id: user_id })
                .await;
        }

        GatewayCommand::StopTyping { receiver_id } => {
            trace!("{} stopped typing -> {}", user_id, receiver_id);
            dispatcher
                .send_to_user(receiver_id, GatewayEvent::UserStoppedTyping { sender_id: user_id })
                .await;
        }
    }
}

/// Best-effort: runs detached, failures are only logged.
fn record_last_seen(db: Arc<Database>, user_id: Uuid) {
    tokio::spawn(async move {
        let uid = user_id.to_string();
        let at = sayhi_db::now_timestamp();
        match tokio::task::spawn_blocking(move || db.touch_last_seen(&uid, &at)).await {
            Ok(Ok(())) => debug!("Recorded last seen for {}", user_id),
            Ok(Err(e)) => warn!("Failed to record last seen for {}: {}", user_id, e),
            Err(e) => warn!("spawn_blocking join error recording last seen: {}", e),
        }
    });
}

fn encode(event: &GatewayEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            warn!("Failed to serialize gateway event: {}", e);
            None
        }
    }
}
