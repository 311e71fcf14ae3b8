use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::RoomId;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendMessage {
    pub(crate) project_id: RoomId,
    /// `{ id, senderId, senderName, senderAvatar, text, timestamp, attachment? }`
    /// as built by the client. Relayed untouched, unknown fields included.
    pub(crate) message: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Typing {
    pub(crate) project_id: RoomId,
    pub(crate) user_id: String,
    pub(crate) user_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StopTyping {
    pub(crate) project_id: RoomId,
    pub(crate) user_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserTyping<'a> {
    pub(crate) user_id: &'a str,
    pub(crate) user_name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserStopTyping<'a> {
    pub(crate) user_id: &'a str,
}
