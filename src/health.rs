use axum::{debug_handler, extract::State, Json};

use crate::{rooms::{Hub, HubStats}, AppResult};

#[debug_handler(state = crate::AppState)]
pub async fn health(State(hub): State<Hub>) -> AppResult<Json<HubStats>> {
    Ok(Json(hub.stats().await?))
}
