// HTTP side channel (health, metrics, read-only game state), the spectator
// WebSocket, and the line protocol spoken on the game port.

pub mod conn;
pub mod protocol;
pub mod ws;

use axum::{
    extract::{Json, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::engine::map;
use crate::engine::server::GameServer;
use crate::metrics;

// ── Shared application state ─────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub game_server: Arc<GameServer>,
}

// ── Error helper ──────────────────────────────────────────────────────

fn json_error(status: StatusCode, msg: &str) -> impl IntoResponse {
    (status, Json(json!({ "error": msg })))
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(game_server: Arc<GameServer>) -> Router {
    let state = AppState { game_server };

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_text))
        // Game
        .route("/api/state", get(game_state))
        .route("/api/status", get(game_status))
        .route("/api/roster", get(roster))
        .route("/api/maps", get(list_maps))
        // WebSocket
        .route("/ws/game", get(ws::ws_game))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "tilewar-server" }))
}

async fn metrics_text() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}

/// The most recent snapshot message, exactly as game clients received it.
async fn game_state(State(state): State<AppState>) -> impl IntoResponse {
    match state.game_server.latest_snapshot() {
        Some(snapshot) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            snapshot,
        )
            .into_response(),
        None => json_error(StatusCode::SERVICE_UNAVAILABLE, "No game is running").into_response(),
    }
}

async fn game_status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(json!(state.game_server.status()))).into_response()
}

async fn roster(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(json!(state.game_server.roster()))).into_response()
}

async fn list_maps() -> impl IntoResponse {
    (StatusCode::OK, Json(json!(map::list_maps()))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(Arc::new(GameServer::new()));
        let (status, body) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_state_unavailable_without_a_game() {
        let app = router(Arc::new(GameServer::new()));
        let (status, body) = get_json(app, "/api/state").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_status_and_roster() {
        let server = Arc::new(GameServer::new());
        server.set_map_name("The Rumble");
        server.register("127.0.0.1:9999".parse().unwrap());

        let (status, body) = get_json(router(server.clone()), "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["running"], false);
        assert_eq!(body["map"], "The Rumble");
        assert_eq!(body["clients"], 1);

        let (_, body) = get_json(router(server), "/api/roster").await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["name"], "player-1");
    }

    #[tokio::test]
    async fn test_metrics_exposition() {
        metrics::register_metrics();
        metrics::TICKS_TOTAL.inc();
        let app = router(Arc::new(GameServer::new()));
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("tilewar_ticks_total"));
    }

    #[tokio::test]
    async fn test_list_maps() {
        let app = router(Arc::new(GameServer::new()));
        let (status, body) = get_json(app, "/api/maps").await;
        assert_eq!(status, StatusCode::OK);
        let maps = body.as_array().unwrap();
        assert_eq!(maps.len(), map::BUILTIN_MAPS.len());
        assert!(maps.iter().any(|m| m["name"] == "The Rumble"));
    }
}
