use std::collections::{HashMap, HashSet};

use axum::extract::ws::Utf8Bytes;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::{
    auth::PrincipalId,
    protocol::{self, Frame, EventFailed, ERROR},
};

use super::{
    handlers::{self, EventError, Handler},
    registry::RoomRegistry,
    ConnectionId, RoomId,
};

/// Outbound queue of an admitted socket; drained by its writer task.
pub type Outbox = mpsc::Sender<Utf8Bytes>;

struct Connection {
    principal: PrincipalId,
    rooms: HashSet<RoomId>,
    outbox: Outbox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub rooms: usize,
}

/// Room membership, admitted connections and event dispatch.
///
/// Everything here is synchronous: the [`Hub`](super::Hub) task owns one
/// `Relay` and feeds it commands one at a time.
pub struct Relay {
    registry: RoomRegistry,
    connections: HashMap<ConnectionId, Connection>,
    handlers: HashMap<&'static str, Handler>,
    report_errors: bool,
}

impl Relay {
    pub fn new(registry: RoomRegistry) -> Self {
        Self {
            registry,
            connections: HashMap::new(),
            handlers: handlers::table(),
            report_errors: false,
        }
    }

    /// Answer dropped events with an `error` frame instead of staying silent.
    pub fn report_errors(mut self, report_errors: bool) -> Self {
        self.report_errors = report_errors;
        self
    }

    pub fn admit(&mut self, conn_id: ConnectionId, principal: PrincipalId, outbox: Outbox) {
        let connection = Connection {
            principal,
            rooms: HashSet::new(),
            outbox,
        };
        if let Some(stale) = self.connections.insert(conn_id, connection) {
            warn!(%conn_id, "connection admitted twice, dropping previous memberships");
            self.registry.leave_all(conn_id, &stale.rooms);
        }
    }

    /// Entry point for a raw inbound text frame. Failures drop this one event.
    pub fn handle_text(&mut self, conn_id: ConnectionId, text: &str) {
        let frame = serde_json::from_str::<Frame>(text).map_err(EventError::MalformedFrame);
        let event = frame.as_ref().ok().map(|frame| frame.event.clone());

        if let Err(err) = frame.and_then(|frame| self.dispatch(conn_id, frame)) {
            warn!(%conn_id, event = event.as_deref(), error = %err, "dropping event");
            if self.report_errors && !matches!(err, EventError::NotAdmitted(_)) {
                self.report(conn_id, event.as_deref(), &err);
            }
        }
    }

    pub fn dispatch(&mut self, conn_id: ConnectionId, frame: Frame) -> Result<(), EventError> {
        if !self.connections.contains_key(&conn_id) {
            return Err(EventError::NotAdmitted(conn_id));
        }

        let handler = *self.handlers
            .get(frame.event.as_str())
            .ok_or_else(|| EventError::UnknownEvent(frame.event.clone()))?;

        debug!(%conn_id, event = %frame.event, "dispatching");
        handler(self, conn_id, frame.data)
    }

    /// Tears down a connection and removes it from every room it joined.
    pub fn disconnect(&mut self, conn_id: ConnectionId) -> bool {
        let Some(connection) = self.connections.remove(&conn_id) else {
            return false;
        };

        self.registry.leave_all(conn_id, &connection.rooms);
        debug!(%conn_id, principal = %connection.principal, rooms = connection.rooms.len(), "connection removed");
        true
    }

    pub fn members_of(&self, room_id: &str) -> HashSet<ConnectionId> {
        self.registry.members_of(room_id)
    }

    pub fn rooms_of(&self, conn_id: ConnectionId) -> Option<&HashSet<RoomId>> {
        self.connections.get(&conn_id).map(|connection| &connection.rooms)
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.connections.len(),
            rooms: self.registry.room_count(),
        }
    }

    pub(crate) fn principal(&self, conn_id: ConnectionId) -> Result<&PrincipalId, EventError> {
        self.connections
            .get(&conn_id)
            .map(|connection| &connection.principal)
            .ok_or(EventError::NotAdmitted(conn_id))
    }

    pub(crate) fn is_member(&self, conn_id: ConnectionId, room_id: &str) -> bool {
        self.rooms_of(conn_id).is_some_and(|rooms| rooms.contains(room_id))
    }

    pub(crate) fn join(&mut self, conn_id: ConnectionId, room_id: RoomId) -> Result<(), EventError> {
        if room_id.is_empty() {
            return Err(EventError::EmptyRoomId);
        }
        let connection = self.connections
            .get_mut(&conn_id)
            .ok_or(EventError::NotAdmitted(conn_id))?;

        self.registry.join(&room_id, conn_id);
        debug!(%conn_id, principal = %connection.principal, room_id = %room_id, "joined project chat");
        connection.rooms.insert(room_id);
        Ok(())
    }

    pub(crate) fn leave(&mut self, conn_id: ConnectionId, room_id: &str) -> Result<(), EventError> {
        if room_id.is_empty() {
            return Err(EventError::EmptyRoomId);
        }
        let connection = self.connections
            .get_mut(&conn_id)
            .ok_or(EventError::NotAdmitted(conn_id))?;

        self.registry.leave(room_id, conn_id);
        connection.rooms.remove(room_id);
        debug!(%conn_id, principal = %connection.principal, room_id, "left project chat");
        Ok(())
    }

    /// Fans `payload` out to the room's current members, optionally skipping
    /// the connection it came from. Returns how many outboxes accepted it.
    pub(crate) fn broadcast_to_room<T: Serialize>(
        &self,
        origin: ConnectionId,
        room_id: &str,
        event: &'static str,
        payload: &T,
        exclude_self: bool,
    ) -> Result<usize, EventError> {
        let frame = protocol::encode(event, payload)
            .map_err(|source| EventError::Encode { event, source })?;

        let mut delivered = 0;
        for member in self.registry.members(room_id) {
            if exclude_self && *member == origin {
                continue;
            }
            if self.send_to(*member, frame.clone()) {
                delivered += 1;
            }
        }

        debug!(%origin, room_id, event, delivered, "broadcast");
        Ok(delivered)
    }

    fn send_to(&self, conn_id: ConnectionId, frame: Utf8Bytes) -> bool {
        let Some(connection) = self.connections.get(&conn_id) else {
            warn!(%conn_id, "room member has no live connection");
            return false;
        };

        match connection.outbox.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(%conn_id, "outbox full, dropping frame");
                false
            }
            // the socket is closing; its disconnect is already queued
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn report(&self, conn_id: ConnectionId, event: Option<&str>, err: &EventError) {
        let failed = EventFailed { event, message: err.to_string() };
        match protocol::encode(ERROR, &failed) {
            Ok(frame) => {
                self.send_to(conn_id, frame);
            }
            Err(err) => warn!(%conn_id, error = %err, "failed to encode error event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;

    fn admit(relay: &mut Relay, principal: &str) -> (ConnectionId, mpsc::Receiver<Utf8Bytes>) {
        let conn_id = Uuid::now_v7();
        let (tx, rx) = mpsc::channel(16);
        relay.admit(conn_id, principal.to_owned(), tx);
        (conn_id, rx)
    }

    fn send(relay: &mut Relay, conn_id: ConnectionId, event: &str, data: Value) {
        relay.handle_text(conn_id, &json!({ "event": event, "data": data }).to_string());
    }

    fn drain(rx: &mut mpsc::Receiver<Utf8Bytes>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = rx.try_recv() {
            frames.push(serde_json::from_str(text.as_str()).unwrap());
        }
        frames
    }

    #[test]
    fn join_keeps_both_directions_in_sync() {
        let mut relay = Relay::new(RoomRegistry::new());
        let (a, _rx) = admit(&mut relay, "alice");

        send(&mut relay, a, "join_project_chat", json!("p1"));
        send(&mut relay, a, "join_project_chat", json!("p1"));

        assert_eq!(relay.members_of("p1"), HashSet::from([a]));
        assert_eq!(relay.rooms_of(a), Some(&HashSet::from(["p1".to_owned()])));

        send(&mut relay, a, "leave_project_chat", json!("p1"));
        assert!(relay.members_of("p1").is_empty());
        assert!(relay.rooms_of(a).unwrap().is_empty());
        assert_eq!(relay.stats(), HubStats { connections: 1, rooms: 0 });
    }

    #[test]
    fn message_reaches_every_member_including_sender() {
        let mut relay = Relay::new(RoomRegistry::new());
        let (a, mut rx_a) = admit(&mut relay, "alice");
        let (b, mut rx_b) = admit(&mut relay, "bob");
        send(&mut relay, a, "join_project_chat", json!("p1"));
        send(&mut relay, b, "join_project_chat", json!("p1"));

        let message = json!({ "id": "m1", "text": "hi", "extra": [1, 2] });
        send(&mut relay, a, "send_message", json!({ "projectId": "p1", "message": message }));

        let expected = json!({ "event": "receive_message", "data": message });
        assert_eq!(drain(&mut rx_a), vec![expected.clone()]);
        assert_eq!(drain(&mut rx_b), vec![expected]);
    }

    #[test]
    fn typing_skips_sender_and_outsiders() {
        let mut relay = Relay::new(RoomRegistry::new());
        let (a, mut rx_a) = admit(&mut relay, "alice");
        let (_b, mut rx_b) = admit(&mut relay, "bob");
        let (c, mut rx_c) = admit(&mut relay, "carol");
        send(&mut relay, a, "join_project_chat", json!("p1"));
        send(&mut relay, c, "join_project_chat", json!("p1"));

        send(&mut relay, a, "typing", json!({ "projectId": "p1", "userId": "alice", "userName": "Alice" }));
        send(&mut relay, a, "stop_typing", json!({ "projectId": "p1", "userId": "alice" }));

        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(drain(&mut rx_c), vec![
            json!({ "event": "user_typing", "data": { "userId": "alice", "userName": "Alice" } }),
            json!({ "event": "user_stop_typing", "data": { "userId": "alice" } }),
        ]);
    }

    #[test]
    fn unjoined_sender_still_reaches_the_room() {
        let mut relay = Relay::new(RoomRegistry::new());
        let (a, mut rx_a) = admit(&mut relay, "alice");
        let (b, mut rx_b) = admit(&mut relay, "bob");
        send(&mut relay, b, "join_project_chat", json!("p1"));

        send(&mut relay, a, "send_message", json!({ "projectId": "p1", "message": { "id": "m1" } }));

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[test]
    fn malformed_events_are_dropped_without_side_effects() {
        let mut relay = Relay::new(RoomRegistry::new());
        let (a, mut rx_a) = admit(&mut relay, "alice");
        send(&mut relay, a, "join_project_chat", json!("p1"));

        relay.handle_text(a, "{not json");
        send(&mut relay, a, "send_message", json!({ "projectId": "p1" }));
        send(&mut relay, a, "send_message", json!({ "projectId": "p1", "message": "just text" }));
        send(&mut relay, a, "join_project_chat", json!(42));
        send(&mut relay, a, "join_project_chat", json!(""));
        send(&mut relay, a, "no_such_event", json!(null));

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(relay.members_of("p1"), HashSet::from([a]));
        assert_eq!(relay.stats(), HubStats { connections: 1, rooms: 1 });

        send(&mut relay, a, "send_message", json!({ "projectId": "p1", "message": { "id": "m2" } }));
        assert_eq!(drain(&mut rx_a).len(), 1);
    }

    #[test]
    fn dispatch_reports_specific_errors() {
        let mut relay = Relay::new(RoomRegistry::new());
        let (a, _rx) = admit(&mut relay, "alice");

        let frame = |event: &str, data: Value| Frame { event: event.to_owned(), data };

        assert!(matches!(
            relay.dispatch(a, frame("nope", Value::Null)),
            Err(EventError::UnknownEvent(name)) if name == "nope"
        ));
        assert!(matches!(
            relay.dispatch(a, frame("typing", json!({ "projectId": "p1" }))),
            Err(EventError::Malformed { event: "typing", .. })
        ));
        assert!(matches!(
            relay.dispatch(a, frame("leave_project_chat", json!(""))),
            Err(EventError::EmptyRoomId)
        ));
    }

    #[test]
    fn events_from_unadmitted_connections_never_run() {
        let mut relay = Relay::new(RoomRegistry::new());
        let stranger = Uuid::now_v7();

        let frame = Frame { event: "join_project_chat".to_owned(), data: json!("p1") };
        assert!(matches!(relay.dispatch(stranger, frame), Err(EventError::NotAdmitted(id)) if id == stranger));

        send(&mut relay, stranger, "join_project_chat", json!("p1"));
        assert!(!relay.registry.contains("p1"));
    }

    #[test]
    fn disconnect_leaves_every_joined_room() {
        let mut relay = Relay::new(RoomRegistry::new());
        let (a, _rx_a) = admit(&mut relay, "alice");
        let (b, _rx_b) = admit(&mut relay, "bob");
        send(&mut relay, a, "join_project_chat", json!("p1"));
        send(&mut relay, a, "join_project_chat", json!("p2"));
        send(&mut relay, b, "join_project_chat", json!("p2"));

        assert!(relay.disconnect(a));
        assert!(!relay.disconnect(a));

        assert!(!relay.members_of("p1").contains(&a));
        assert_eq!(relay.members_of("p2"), HashSet::from([b]));
        assert_eq!(relay.stats(), HubStats { connections: 1, rooms: 1 });
    }

    #[test]
    fn closed_outbox_does_not_stop_fan_out() {
        let mut relay = Relay::new(RoomRegistry::new());
        let (a, rx_a) = admit(&mut relay, "alice");
        let (b, mut rx_b) = admit(&mut relay, "bob");
        send(&mut relay, a, "join_project_chat", json!("p1"));
        send(&mut relay, b, "join_project_chat", json!("p1"));
        drop(rx_a);

        send(&mut relay, b, "send_message", json!({ "projectId": "p1", "message": { "id": "m1" } }));
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[test]
    fn full_outbox_drops_only_for_that_member() {
        let mut relay = Relay::new(RoomRegistry::new());
        let slow = Uuid::now_v7();
        let (tx, mut rx_slow) = mpsc::channel(1);
        relay.admit(slow, "slow".to_owned(), tx);
        let (b, mut rx_b) = admit(&mut relay, "bob");
        send(&mut relay, slow, "join_project_chat", json!("p1"));
        send(&mut relay, b, "join_project_chat", json!("p1"));

        for id in ["m1", "m2"] {
            send(&mut relay, b, "send_message", json!({ "projectId": "p1", "message": { "id": id } }));
        }

        assert_eq!(drain(&mut rx_slow).len(), 1);
        assert_eq!(drain(&mut rx_b).len(), 2);
    }

    #[test]
    fn errors_are_reported_back_when_enabled() {
        let mut relay = Relay::new(RoomRegistry::new()).report_errors(true);
        let (a, mut rx_a) = admit(&mut relay, "alice");

        send(&mut relay, a, "typing", json!({ "projectId": "p1" }));
        relay.handle_text(a, "{not json");

        let frames = drain(&mut rx_a);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["event"], "error");
        assert_eq!(frames[0]["data"]["event"], "typing");
        assert_eq!(frames[1]["event"], "error");
        assert!(frames[1]["data"]["event"].is_null());
    }
}
