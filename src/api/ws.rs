// WebSocket handler for spectators: the same JSON lines game clients get,
// one per text frame. Anything the browser sends is ignored.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use tokio::sync::broadcast::error::RecvError;

use super::AppState;

/// WebSocket upgrade handler for the read-only game stream.
pub async fn ws_game(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(mut socket: WebSocket, state: AppState) {
    let mut rx = state.game_server.subscribe();
    let mut shutdown = state.game_server.shutdown_signal();

    // Late joiners see the board immediately.
    if let Some(snapshot) = state.game_server.latest_snapshot() {
        if socket.send(Message::Text(snapshot.into())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = rx.recv() => match result {
                Ok(msg) => {
                    if socket.send(Message::Text(msg.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("WebSocket spectator lagged, skipped {n} messages");
                }
            },
            result = socket.recv() => match result {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
            _ = shutdown.changed() => break,
        }
    }
}
