use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::protocol::{
    JOIN_PROJECT_CHAT, LEAVE_PROJECT_CHAT, RECEIVE_MESSAGE, SEND_MESSAGE, STOP_TYPING, TYPING,
    USER_STOP_TYPING, USER_TYPING,
};

use super::{
    msg::{SendMessage, StopTyping, Typing, UserStopTyping, UserTyping},
    relay::Relay,
    ConnectionId, RoomId,
};

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("malformed frame: {0}")]
    MalformedFrame(#[source] serde_json::Error),
    #[error("unknown event `{0}`")]
    UnknownEvent(String),
    #[error("malformed `{event}` payload: {source}")]
    Malformed {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("project id must not be empty")]
    EmptyRoomId,
    #[error("connection {0} was never admitted")]
    NotAdmitted(ConnectionId),
    #[error("failed to encode `{event}`: {source}")]
    Encode {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

pub(crate) type Handler = fn(&mut Relay, ConnectionId, Value) -> Result<(), EventError>;

/// Every inbound event the relay understands.
pub(crate) fn table() -> HashMap<&'static str, Handler> {
    HashMap::from([
        (JOIN_PROJECT_CHAT, join_project_chat as Handler),
        (LEAVE_PROJECT_CHAT, leave_project_chat as Handler),
        (SEND_MESSAGE, send_message as Handler),
        (TYPING, typing as Handler),
        (STOP_TYPING, stop_typing as Handler),
    ])
}

fn payload<T: DeserializeOwned>(event: &'static str, data: Value) -> Result<T, EventError> {
    serde_json::from_value(data).map_err(|source| EventError::Malformed { event, source })
}

fn join_project_chat(relay: &mut Relay, conn_id: ConnectionId, data: Value) -> Result<(), EventError> {
    let project_id: RoomId = payload(JOIN_PROJECT_CHAT, data)?;
    relay.join(conn_id, project_id)
}

fn leave_project_chat(relay: &mut Relay, conn_id: ConnectionId, data: Value) -> Result<(), EventError> {
    let project_id: RoomId = payload(LEAVE_PROJECT_CHAT, data)?;
    relay.leave(conn_id, &project_id)
}

fn send_message(relay: &mut Relay, conn_id: ConnectionId, data: Value) -> Result<(), EventError> {
    let SendMessage { project_id, message } = payload(SEND_MESSAGE, data)?;
    audit_unjoined(relay, conn_id, &project_id, SEND_MESSAGE)?;

    relay.broadcast_to_room(conn_id, &project_id, RECEIVE_MESSAGE, &message, false)?;
    Ok(())
}

fn typing(relay: &mut Relay, conn_id: ConnectionId, data: Value) -> Result<(), EventError> {
    let Typing { project_id, user_id, user_name } = payload(TYPING, data)?;
    audit_unjoined(relay, conn_id, &project_id, TYPING)?;
    audit_impersonation(relay, conn_id, &user_id, TYPING)?;

    let event = UserTyping { user_id: &user_id, user_name: &user_name };
    relay.broadcast_to_room(conn_id, &project_id, USER_TYPING, &event, true)?;
    Ok(())
}

fn stop_typing(relay: &mut Relay, conn_id: ConnectionId, data: Value) -> Result<(), EventError> {
    let StopTyping { project_id, user_id } = payload(STOP_TYPING, data)?;
    audit_unjoined(relay, conn_id, &project_id, STOP_TYPING)?;
    audit_impersonation(relay, conn_id, &user_id, STOP_TYPING)?;

    relay.broadcast_to_room(conn_id, &project_id, USER_STOP_TYPING, &UserStopTyping { user_id: &user_id }, true)?;
    Ok(())
}

// Relaying into a room the sender never joined is allowed, but leaves a trail.
fn audit_unjoined(relay: &Relay, conn_id: ConnectionId, project_id: &str, event: &'static str) -> Result<(), EventError> {
    if project_id.is_empty() {
        return Err(EventError::EmptyRoomId);
    }
    if !relay.is_member(conn_id, project_id) {
        let principal = relay.principal(conn_id)?;
        warn!(%conn_id, %principal, project_id, event, "relaying into a room the sender has not joined");
    }
    Ok(())
}

fn audit_impersonation(relay: &Relay, conn_id: ConnectionId, user_id: &str, event: &'static str) -> Result<(), EventError> {
    let principal = relay.principal(conn_id)?;
    if principal != user_id {
        warn!(%conn_id, %principal, claimed = user_id, event, "typing signal names a different user");
    }
    Ok(())
}
