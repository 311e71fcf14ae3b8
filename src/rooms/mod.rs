mod handlers;
mod hub;
mod msg;
mod registry;
mod relay;
mod ws;

use axum::{routing::get, Router};
use uuid::Uuid;

use crate::AppState;

pub use handlers::EventError;
pub use hub::{Hub, HubError};
pub use registry::RoomRegistry;
pub use relay::{HubStats, Outbox, Relay};

/// Project identifier a room is keyed by.
pub type RoomId = String;
pub type ConnectionId = Uuid;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::relay_ws))
}
