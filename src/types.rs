use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub language_code: String,
    pub can_join_groups: bool,
    pub can_read_all_group_messages: bool,
    pub supports_inline_queries: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Chat {
    pub id: i64,
    /// "private", "group", "supergroup" or "channel"
    #[serde(rename = "type")]
    pub chat_type: String,
    pub title: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

/// An inbound (or sent) message. Only text messages carry a body; everything
/// else deserializes with an empty `text`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Message {
    pub message_id: i32,
    pub chat: Chat,
    pub from: User,
    pub text: String,
}

/// One entry of a `getUpdates` batch.
///
/// Updates that are not messages (edits, callbacks, ...) still carry an
/// `update_id` and must advance the offset, so `message` defaults to an
/// empty one instead of failing the whole batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Message,
}
