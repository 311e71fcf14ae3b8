use std::collections::HashSet;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::auth::PrincipalId;

use super::{
    relay::{HubStats, Outbox, Relay},
    ConnectionId, RoomId,
};

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("relay hub has shut down")]
    Closed,
}

enum Command {
    Admit {
        conn_id: ConnectionId,
        principal: PrincipalId,
        outbox: Outbox,
    },
    Text {
        conn_id: ConnectionId,
        text: Utf8Bytes,
    },
    Disconnect {
        conn_id: ConnectionId,
    },
    MembersOf {
        room_id: RoomId,
        reply: oneshot::Sender<HashSet<ConnectionId>>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

/// Handle to the task that owns the [`Relay`].
///
/// All sockets feed one bounded command queue, so each connection's events
/// are applied in the order it sent them and fan-out follows arrival order.
/// A full queue makes the sending socket's reader wait instead of growing
/// without limit.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<Command>,
}

impl Hub {
    /// Spawns the hub task on the current runtime. It stops once every
    /// handle has been dropped.
    pub fn spawn(relay: Relay, capacity: usize) -> Self {
        let (commands, rx) = mpsc::channel(capacity);
        tokio::spawn(run(relay, rx));
        Self { commands }
    }

    pub async fn admit(&self, conn_id: ConnectionId, principal: PrincipalId, outbox: Outbox) -> Result<(), HubError> {
        self.send(Command::Admit { conn_id, principal, outbox }).await
    }

    pub async fn text(&self, conn_id: ConnectionId, text: Utf8Bytes) -> Result<(), HubError> {
        self.send(Command::Text { conn_id, text }).await
    }

    pub async fn disconnect(&self, conn_id: ConnectionId) -> Result<(), HubError> {
        self.send(Command::Disconnect { conn_id }).await
    }

    pub async fn members_of(&self, room_id: impl Into<RoomId>) -> Result<HashSet<ConnectionId>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::MembersOf { room_id: room_id.into(), reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    async fn send(&self, command: Command) -> Result<(), HubError> {
        self.commands.send(command).await.map_err(|_| HubError::Closed)
    }
}

async fn run(mut relay: Relay, mut rx: mpsc::Receiver<Command>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Admit { conn_id, principal, outbox } => relay.admit(conn_id, principal, outbox),
            Command::Text { conn_id, text } => relay.handle_text(conn_id, text.as_str()),
            Command::Disconnect { conn_id } => {
                relay.disconnect(conn_id);
            }
            Command::MembersOf { room_id, reply } => {
                let _ = reply.send(relay.members_of(&room_id));
            }
            Command::Stats { reply } => {
                let _ = reply.send(relay.stats());
            }
        }
    }
    debug!("relay hub stopped");
}
