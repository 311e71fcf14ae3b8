//! JSON envelopes carried in WebSocket text frames.
//!
//! Every frame is `{"event": <name>, "data": <payload>}`. The only exception
//! is the handshake, the first frame a client sends: `{"auth": {"token": ..}}`.

use axum::extract::ws::Utf8Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JOIN_PROJECT_CHAT: &str = "join_project_chat";
pub const LEAVE_PROJECT_CHAT: &str = "leave_project_chat";
pub const SEND_MESSAGE: &str = "send_message";
pub const TYPING: &str = "typing";
pub const STOP_TYPING: &str = "stop_typing";

pub const RECEIVE_MESSAGE: &str = "receive_message";
pub const USER_TYPING: &str = "user_typing";
pub const USER_STOP_TYPING: &str = "user_stop_typing";

pub const CONNECT: &str = "connect";
pub const CONNECT_ERROR: &str = "connect_error";
pub const ERROR: &str = "error";

/// An inbound frame. `data` stays untyped until a handler claims it.
#[derive(Debug, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Serialize)]
struct OutFrame<'a, T> {
    event: &'a str,
    data: &'a T,
}

/// Serializes an outbound frame once so it can be cloned to many sockets.
pub fn encode<T: Serialize>(event: &str, data: &T) -> serde_json::Result<Utf8Bytes> {
    serde_json::to_string(&OutFrame { event, data }).map(Utf8Bytes::from)
}

#[derive(Debug, Default, Deserialize)]
pub struct Handshake {
    #[serde(default)]
    pub auth: Option<HandshakeAuth>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HandshakeAuth {
    #[serde(default)]
    pub token: Option<String>,
}

impl Handshake {
    /// Pulls the bearer token out of a handshake frame, if there is one.
    pub fn token(text: &str) -> Option<String> {
        serde_json::from_str::<Handshake>(text)
            .ok()?
            .auth?
            .token
    }
}

#[derive(Serialize)]
pub struct Connected {
    pub id: uuid::Uuid,
}

#[derive(Serialize)]
pub struct ConnectError<'a> {
    pub message: &'a str,
}

#[derive(Serialize)]
pub struct EventFailed<'a> {
    pub event: Option<&'a str>,
    pub message: String,
}
