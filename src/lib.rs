pub mod appresult;
pub mod auth;
pub mod config;
pub mod health;
pub mod protocol;
pub mod rooms;

use std::sync::Arc;

use axum::{
    extract::FromRef,
    http::{HeaderValue, Method},
    routing::get,
    Router,
};
use tower_http::{cors::{Any, CorsLayer}, trace::TraceLayer};

pub use appresult::{AppError, AppResult};
pub use config::Config;

use auth::TokenVerifier;
use rooms::{Hub, Relay, RoomRegistry};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub hub: Hub,
    pub verifier: TokenVerifier,
    pub config: Arc<Config>,
}

impl AppState {
    /// Builds the verifier and spawns the relay hub; needs a running tokio runtime.
    pub fn new(config: Config) -> Self {
        let relay = Relay::new(RoomRegistry::new())
            .report_errors(config.report_errors);

        AppState {
            hub: Hub::spawn(relay, config.hub_capacity),
            verifier: TokenVerifier::new(&config.jwt_secret),
            config: Arc::new(config),
        }
    }
}

pub fn app(state: AppState) -> anyhow::Result<Router> {
    let cors = if state.config.client_url == "*" {
        CorsLayer::new().allow_origin(Any)
    } else {
        CorsLayer::new()
            .allow_origin(HeaderValue::from_str(&state.config.client_url)?)
            .allow_credentials(true)
    }
    .allow_methods([Method::GET, Method::POST]);

    Ok(
        Router::new()
            .route("/health", get(health::health))
            .merge(rooms::router())
            .with_state(state)
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    )
}
