//! WebSocket endpoint: one socket per client, events scoped to rooms.
//!
//! Each connection gets a random [`ConnectionId`]. Joining a room subscribes
//! the connection to that room's fanout; a spawned forwarder task filters out
//! the connection's own events and funnels the rest into a per-connection
//! queue that the socket loop drains. A single socket may be a member of
//! several rooms at once.

use crate::sync::{ConnectionId, ShareRoom, ShareState};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use cellshare_sync::protocol::{ClientEvent, ServerEvent};
use futures::{Sink, SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Shared state for the WebSocket handler
#[derive(Clone)]
pub struct WsState {
    pub share_state: Arc<ShareState>,
}

/// A room this connection has joined: the room handle plus the forwarder
/// task draining its fanout into the connection queue.
struct Membership {
    room: Arc<ShareRoom>,
    forwarder: JoinHandle<()>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(State(state): State<WsState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let connection_id: ConnectionId = Uuid::new_v4();

    // Fanout events from every joined room funnel into this queue.
    let (events_tx, mut events_rx) = mpsc::channel::<ServerEvent>(256);
    let mut memberships: HashMap<String, Membership> = HashMap::new();

    info!("WebSocket connected: connection={}", connection_id);

    loop {
        tokio::select! {
            // Handle incoming events from the client
            Some(msg) = ws_rx.next() => {
                match msg {
                    Ok(Message::Text(text)) => {
                        let event = match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => event,
                            Err(e) => {
                                warn!("Unrecognized event from {}: {}", connection_id, e);
                                continue;
                            }
                        };

                        let reply = handle_event(
                            &state,
                            connection_id,
                            event,
                            &mut memberships,
                            &events_tx,
                        )
                        .await;

                        if let Some(reply) = reply
                            && let Err(e) = send_event(&mut ws_tx, &reply).await
                        {
                            error!("Failed to send reply: {}", e);
                            break;
                        }
                    }
                    Ok(Message::Ping(data)) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            error!("Failed to send pong: {}", e);
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("Client requested close");
                        break;
                    }
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            // Handle fanout events from joined rooms
            Some(event) = events_rx.recv() => {
                if let Err(e) = send_event(&mut ws_tx, &event).await {
                    error!("Failed to send broadcast: {}", e);
                    break;
                }
            }

            else => break,
        }
    }

    // Leave every joined room and drop idle shells
    for (name, membership) in memberships {
        membership.forwarder.abort();
        membership.room.unsubscribe();
        state.share_state.maybe_remove_room(&name).await;
    }

    info!("WebSocket disconnected: connection={}", connection_id);
}

async fn send_event(
    ws_tx: &mut (impl Sink<Message, Error = axum::Error> + Unpin),
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).map_err(axum::Error::new)?;
    ws_tx.send(Message::Text(json.into())).await
}

/// Dispatch one client event; the return value is a direct reply for the
/// requesting connection only. Room-wide effects go through the room fanout.
///
/// Mutations that fail are logged and dropped; the client gets no error
/// reply and other members see nothing.
async fn handle_event(
    state: &WsState,
    connection_id: ConnectionId,
    event: ClientEvent,
    memberships: &mut HashMap<String, Membership>,
    events_tx: &mpsc::Sender<ServerEvent>,
) -> Option<ServerEvent> {
    match event {
        ClientEvent::JoinRoom { room } => {
            let ok = state.share_state.join_check(&room).await;
            Some(ServerEvent::JoinCheck { ok })
        }
        ClientEvent::CreateRoom { room } => {
            let ok = state.share_state.create_check(&room).await;
            Some(ServerEvent::CreateCheck { ok })
        }
        ClientEvent::DeleteRoom { room } => {
            state.share_state.delete_room(&room, connection_id).await;
            None
        }
        ClientEvent::Join { room } => {
            let room = join_room(state, connection_id, &room, memberships, events_tx).await;
            let cells = room.snapshot().await;
            Some(ServerEvent::GetFile { cells })
        }
        ClientEvent::Create { room } => {
            join_room(state, connection_id, &room, memberships, events_tx).await;
            None
        }
        ClientEvent::SendFullFile { room, cells } => {
            let room = join_room(state, connection_id, &room, memberships, events_tx).await;
            room.replace_all(cells).await;
            None
        }
        ClientEvent::Patch { room, index, patch } => {
            if let Some(room) = active_room(state, &room, memberships).await
                && let Err(e) = room.apply_patch(connection_id, index, patch).await
            {
                warn!("Dropped patch for room {}: {}", room.name(), e);
            }
            None
        }
        ClientEvent::AddOutput {
            room,
            index,
            output,
        } => {
            if let Some(room) = active_room(state, &room, memberships).await
                && let Err(e) = room.set_output(connection_id, index, output).await
            {
                warn!("Dropped output for room {}: {}", room.name(), e);
            }
            None
        }
        ClientEvent::MoveCell { room, edit } => {
            if let Some(room) = active_room(state, &room, memberships).await
                && let Err(e) = room.apply_move(connection_id, edit).await
            {
                warn!("Dropped move for room {}: {}", room.name(), e);
            }
            None
        }
        ClientEvent::AddCell { room, edit } => {
            if let Some(room) = active_room(state, &room, memberships).await
                && let Err(e) = room.apply_cells_edit(connection_id, edit).await
            {
                warn!("Dropped cell edit for room {}: {}", room.name(), e);
            }
            None
        }
        ClientEvent::Range { room, ranges } => {
            if let Some(room) = active_room(state, &room, memberships).await {
                room.broadcast(connection_id, ServerEvent::RangeChange { ranges });
            }
            None
        }
        ClientEvent::SelectionText {
            room,
            selections,
            index,
        } => {
            if let Some(room) = active_room(state, &room, memberships).await {
                room.broadcast(connection_id, ServerEvent::Selection { selections, index });
            }
            None
        }
    }
}

/// Join the named room's membership, spawning the fanout forwarder on first
/// join. Joining a room twice is idempotent.
async fn join_room(
    state: &WsState,
    connection_id: ConnectionId,
    name: &str,
    memberships: &mut HashMap<String, Membership>,
    events_tx: &mpsc::Sender<ServerEvent>,
) -> Arc<ShareRoom> {
    if let Some(membership) = memberships.get(name) {
        return membership.room.clone();
    }

    let room = state.share_state.get_or_create_room(name).await;
    let mut fanout_rx = room.subscribe();
    let events_tx = events_tx.clone();
    let forwarder = tokio::spawn(async move {
        loop {
            match fanout_rx.recv().await {
                Ok(room_event) => {
                    // Never echo a connection's own events back to it
                    if room_event.origin == connection_id {
                        continue;
                    }
                    if events_tx.send(room_event.event).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Fanout receiver lagged {} events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    });

    memberships.insert(
        name.to_string(),
        Membership {
            room: room.clone(),
            forwarder,
        },
    );
    debug!(
        "Connection {} joined room {} ({} connections)",
        connection_id,
        name,
        room.connection_count()
    );
    room
}

/// Resolve a room for a mutation or relay without creating a shell. Missing
/// rooms are logged and the event dropped.
async fn active_room(
    state: &WsState,
    name: &str,
    memberships: &HashMap<String, Membership>,
) -> Option<Arc<ShareRoom>> {
    if let Some(membership) = memberships.get(name) {
        return Some(membership.room.clone());
    }
    let room = state.share_state.get_room(name).await;
    if room.is_none() {
        warn!("Dropped event for unknown room: {}", name);
    }
    room
}
