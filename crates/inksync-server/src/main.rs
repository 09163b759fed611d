//! InkSync WebSocket Relay Server
//!
//! Relays scene messages between clients in the same room and keeps a
//! reconciled copy of each room's elements so late joiners start from the
//! current state.
//!
//! ## Protocol
//!
//! Every frame is a JSON envelope carrying `type`, `id` and `timestamp`:
//! ```json
//! { "type": "join_room", "id": "...", "timestamp": 0, "roomId": "board", "userName": "Ada", "color": "#f00" }
//! { "type": "update_element", "id": "...", "timestamp": 0, "element": { ... } }
//! { "type": "cursor_move", "id": "...", "timestamp": 0, "userId": "...", "x": 1.0, "y": 2.0 }
//! ```

mod rooms;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use inksync_core::protocol::{Envelope, Message, UserInfo};
use inksync_core::sync::now_ms;
use rooms::{AppState, Relay};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_ADDR: &str = "0.0.0.0:3030";

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inksync_server=info,tower_http=info".into()),
        )
        .init();

    let addr = listen_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("InkSync relay server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, app(Arc::new(AppState::new()))).await
}

/// `INKSYNC_ADDR`, falling back to the default on absence or parse failure.
fn listen_addr() -> SocketAddr {
    let raw = std::env::var("INKSYNC_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    raw.parse().unwrap_or_else(|e| {
        warn!("invalid INKSYNC_ADDR {:?} ({}), using {}", raw, e, DEFAULT_ADDR);
        SocketAddr::from(([0, 0, 0, 0], 3030))
    })
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> &'static str {
    "InkSync Relay Server - Connect via WebSocket at /ws"
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Encode and send one envelope. `false` once the socket is gone.
async fn send_envelope<S>(sender: &mut S, envelope: &Envelope) -> bool
where
    S: SinkExt<WsMessage> + Unpin,
{
    match envelope.encode() {
        Ok(json) => sender.send(WsMessage::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!("failed to encode {}: {}", envelope.message.kind(), e);
            true
        }
    }
}

fn error_envelope(message: impl Into<String>) -> Envelope {
    Envelope::now(Message::Error {
        message: message.into(),
    })
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let user_id = Uuid::new_v4().to_string();
    info!("New connection: {}", user_id);

    let (mut sender, mut receiver) = socket.split();
    let mut current_room: Option<String> = None;
    let mut room_rx: Option<broadcast::Receiver<Relay>> = None;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        let envelope = match Envelope::decode(text.as_str()) {
                            Ok(envelope) => envelope,
                            Err(e) => {
                                warn!("Invalid message from {}: {}", user_id, e);
                                if !send_envelope(&mut sender, &error_envelope(format!("Invalid message: {e}"))).await {
                                    break;
                                }
                                continue;
                            }
                        };
                        match envelope.message {
                            Message::JoinRoom { room_id, user_name, color } => {
                                if let Some(old_room) = current_room.take() {
                                    leave(&state, &old_room, &user_id);
                                }
                                let user = UserInfo {
                                    user_id: user_id.clone(),
                                    user_name: user_name.clone(),
                                    color: color.clone(),
                                };
                                let (rx, snapshot) = state.join(&room_id, user, now_ms());
                                room_rx = Some(rx);
                                if !send_envelope(&mut sender, &snapshot).await {
                                    current_room = Some(room_id);
                                    break;
                                }
                                state.broadcast(&room_id, &user_id, Envelope::now(Message::UserJoin {
                                    user_id: user_id.clone(),
                                    user_name,
                                    color,
                                }));
                                info!("User {} joined room {}", user_id, room_id);
                                current_room = Some(room_id);
                            }
                            Message::LeaveRoom => {
                                if let Some(room) = current_room.take() {
                                    leave(&state, &room, &user_id);
                                    info!("User {} left room {}", user_id, room);
                                }
                                room_rx = None;
                            }
                            _ => {
                                let Some(room) = current_room.as_deref() else {
                                    if !send_envelope(&mut sender, &error_envelope("Join a room first")).await {
                                        break;
                                    }
                                    continue;
                                };
                                if let Some(relay) = state.apply(room, &user_id, envelope, now_ms()) {
                                    state.broadcast(room, &user_id, relay);
                                }
                            }
                        }
                    }
                    Some(Ok(WsMessage::Binary(_))) => {
                        warn!("Binary frame from {} ignored", user_id);
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        break;
                    }
                    Some(Ok(_)) => {} // Ignore ping/pong
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", user_id, e);
                        break;
                    }
                }
            }

            msg = async {
                match &mut room_rx {
                    Some(rx) => rx.recv().await.ok(),
                    None => std::future::pending::<Option<Relay>>().await,
                }
            } => {
                if let Some((from, envelope)) = msg {
                    // Don't echo back to sender
                    if from != user_id && !send_envelope(&mut sender, &envelope).await {
                        break;
                    }
                }
            }
        }
    }

    if let Some(room) = current_room {
        leave(&state, &room, &user_id);
    }
    info!("Connection closed: {}", user_id);
}

fn leave(state: &AppState, room_id: &str, user_id: &str) {
    state.broadcast(
        room_id,
        user_id,
        Envelope::now(Message::UserLeave {
            user_id: user_id.to_string(),
        }),
    );
    state.leave(room_id, user_id);
}
