use std::collections::{HashMap, HashSet};

use super::{ConnectionId, RoomId};

/// Project room -> connections currently joined to it.
///
/// Rooms are created on first join and pruned as soon as they empty out.
/// The reverse direction (connection -> rooms) is kept by the caller so
/// [`RoomRegistry::leave_all`] never has to scan every room.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the connection was already a member.
    pub fn join(&mut self, room_id: &str, conn_id: ConnectionId) -> bool {
        self.rooms
            .entry(room_id.to_owned())
            .or_default()
            .insert(conn_id)
    }

    /// Returns `false` if the connection was not a member.
    pub fn leave(&mut self, room_id: &str, conn_id: ConnectionId) -> bool {
        let Some(members) = self.rooms.get_mut(room_id) else {
            return false;
        };

        let removed = members.remove(&conn_id);
        if members.is_empty() {
            self.rooms.remove(room_id);
        }
        removed
    }

    pub fn leave_all<'a>(&mut self, conn_id: ConnectionId, rooms: impl IntoIterator<Item = &'a RoomId>) {
        for room_id in rooms {
            self.leave(room_id, conn_id);
        }
    }

    /// Owned snapshot of the room's members.
    pub fn members_of(&self, room_id: &str) -> HashSet<ConnectionId> {
        self.rooms
            .get(room_id)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn members(&self, room_id: &str) -> impl Iterator<Item = &ConnectionId> {
        self.rooms
            .get(room_id)
            .into_iter()
            .flatten()
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
