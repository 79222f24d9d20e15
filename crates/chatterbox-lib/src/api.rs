// ============================
// chatterbox-lib/src/api.rs
// ============================
//! Admin read API: room listing and health.
use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

use crate::domain::RoomInfo;
use crate::error::AppError;
use crate::AppState;

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /api/rooms`
pub async fn list_rooms(State(state): State<AppState>) -> Json<Vec<RoomInfo>> {
    Json(state.hub.list_rooms())
}

/// `GET /api/rooms/{name}`
pub async fn room_info(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<RoomInfo>, AppError> {
    state.hub.room_info(&name).map(Json).ok_or(AppError::RoomNotFound)
}

/// `GET /api/rooms/` with an empty name segment.
pub async fn room_name_required() -> AppError {
    AppError::RoomNameRequired
}
