// ============================
// chatterbox-lib/src/ws_router.rs
// ============================
//! Router assembly and WebSocket connection handling.
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::StreamExt;
use metrics::{counter, gauge};
use serde::Deserialize;
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{error, info};

use crate::api;
use crate::domain::{self, Message};
use crate::hub::Hub;
use crate::metrics as keys;
use crate::session::{Session, MAX_MESSAGE_SIZE};
use crate::AppState;

/// Build the full HTTP surface: WebSocket endpoint, admin read API, and
/// static files for the browser client.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(api::health))
        .route("/api/rooms", get(api::list_rooms))
        .route("/api/rooms/", get(api::room_name_required))
        .route("/api/rooms/{name}", get(api::room_info))
        .fallback_service(ServeDir::new("static"))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    #[serde(default)]
    user: Option<String>,
}

/// `GET /ws?user=<name>`: upgrade to a WebSocket and launch the session.
/// Any origin is accepted in this trust-less build.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    let user = params.user.unwrap_or_default();
    if user.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "user query param required" })),
        )
            .into_response();
    }

    counter!(keys::SESSIONS_CONNECTED).increment(1);
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_connection(socket, state.hub.clone(), user))
        .into_response()
}

/// Drive one connection: write loop as its own task, read loop in this
/// task, both joined before the connection task exits.
async fn handle_connection(socket: WebSocket, hub: Hub, username: String) {
    gauge!(keys::SESSIONS_ACTIVE).increment(1.0);
    info!(user = %username, "client connected");

    let (sink, stream) = socket.split();
    let (session, outbound_rx) = Session::new(hub, username);

    // Greet the client before the loops start, so the notice is the first
    // frame on the wire.
    let notice = Message::system(&format!("connected as {}", session.username()));
    match domain::encode(&notice) {
        Ok(frame) => session.send(frame),
        Err(e) => error!(error = %e, "encode system notice failed"),
    }

    let writer = tokio::spawn(session.clone().write_loop(sink, outbound_rx));
    session.clone().read_loop(stream).await;
    let _ = writer.await;

    info!(user = %session.username(), "client disconnected");
    gauge!(keys::SESSIONS_ACTIVE).decrement(1.0);
}
