use crate::core::auth::AuthContext;
use crate::errors::AppError;
use crate::server::AppState;
use crate::server::auth::Staff;
use crate::server::protocol::{ClientMessage, ServerMessage};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Upgrade `GET /ws/{division}` for an authenticated scanning device.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(division): Path<usize>,
    Staff(auth): Staff,
) -> Response {
    // Refuse the upgrade outright when the operator may not use this division.
    let division_id = match state.engine.divisions().resolve(division) {
        Ok(d) => d,
        Err(e) => return e.into_response(),
    };
    if let Err(e) = auth.require_division(division_id) {
        return e.into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, auth, division))
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    auth: AuthContext,
    division: usize,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let device = match state.coordinator.bind(auth, division, tx).await {
        Ok(device) => device,
        Err(e) => {
            warn!(division, error = %e, "device bind failed");
            if let Ok(json) = ServerMessage::error(&e).to_json() {
                let _ = ws_sender.send(Message::Text(json.into())).await;
            }
            return;
        }
    };

    // Outgoing messages
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let Ok(json) = msg.to_json() else { continue };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        let parsed = match msg {
            Ok(Message::Text(text)) => serde_json::from_str::<ClientMessage>(text.as_str()),
            Ok(Message::Binary(bin)) => serde_json::from_slice::<ClientMessage>(bin.as_ref()),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(device = %device.id, error = %e, "websocket error");
                break;
            }
        };

        let reply = match parsed {
            Ok(msg) => state.coordinator.handle(&device, msg).await,
            Err(e) => ServerMessage::error(&AppError::Validation(format!("bad message: {}", e))),
        };
        if !device.send(reply) {
            break;
        }
    }

    state.coordinator.unbind(device.id);
    writer.abort();
}
