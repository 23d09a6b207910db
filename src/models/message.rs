use serde::{Deserialize, Serialize};

use super::Role;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub room_id: String,
    pub message: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_role: Role,
    pub read: bool,
    pub created_at: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChatRoom {
    pub room_id: String,
    pub last_message: ChatMessage,
    pub unread: i64,
}
