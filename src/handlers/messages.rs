use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{ChatMessage, ChatRoom, User};
use crate::services::notify;
use crate::state::AppState;

use super::{current_owner, current_user};

const ROOM_HISTORY_LIMIT: i64 = 100;

/// Customers may only use their own room; the shop may use any.
fn check_room_access(user: &User, room_id: &str) -> Result<(), AppError> {
    if user.is_owner() || user.channel_key() == room_id {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

// GET /api/messages/rooms/all
pub async fn list_rooms(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ChatRoom>>, AppError> {
    current_owner(&state, &headers)?;

    let db = state.db()?;
    Ok(Json(queries::get_chat_rooms(&db)?))
}

// GET /api/messages/:room_id
pub async fn get_room(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
) -> Result<Json<Vec<ChatMessage>>, AppError> {
    let user = current_user(&state, &headers)?;
    check_room_access(&user, &room_id)?;

    let db = state.db()?;
    Ok(Json(queries::get_room_messages(
        &db,
        &room_id,
        ROOM_HISTORY_LIMIT,
    )?))
}

// POST /api/messages
#[derive(Deserialize)]
pub struct PostMessage {
    pub room_id: Option<String>,
    pub message: String,
}

pub async fn post_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PostMessage>,
) -> Result<(StatusCode, Json<ChatMessage>), AppError> {
    let user = current_user(&state, &headers)?;

    let text = body.message.trim();
    if text.is_empty() {
        return Err(AppError::Validation("message is required".to_string()));
    }

    // A customer always writes into their own room.
    let room_id = match body.room_id.filter(|r| !r.is_empty()) {
        Some(room) => room,
        None if !user.is_owner() => user.channel_key(),
        None => return Err(AppError::Validation("room_id is required".to_string())),
    };
    check_room_access(&user, &room_id)?;

    let msg = ChatMessage {
        id: uuid::Uuid::new_v4().to_string(),
        room_id,
        message: text.to_string(),
        sender_id: user.id.clone(),
        sender_name: user.name.clone(),
        sender_role: user.role,
        read: false,
        created_at: queries::fmt_ts(&Utc::now().naive_utc()),
    };

    {
        let db = state.db()?;
        queries::insert_message(&db, &msg)?;
    }

    notify::emit_chat_message(state.notifier.as_ref(), &msg).await;

    Ok((StatusCode::CREATED, Json(msg)))
}

// PUT /api/messages/:room_id/read
pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let user = current_user(&state, &headers)?;
    check_room_access(&user, &room_id)?;

    let db = state.db()?;
    let updated = queries::mark_room_read(&db, &room_id, &user.id)?;
    Ok(Json(serde_json::json!({"ok": true, "updated": updated})))
}
