use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade}, State},
    http::{header::ORIGIN, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{stream::{SplitSink, SplitStream}, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    auth::{AuthError, PrincipalId, TokenVerifier},
    config::Config,
    protocol::{self, ConnectError, Connected, Handshake, CONNECT, CONNECT_ERROR},
};

use super::Hub;

#[debug_handler(state = crate::AppState)]
pub async fn relay_ws(
    State(hub): State<Hub>,
    State(verifier): State<TokenVerifier>,
    State(config): State<Arc<Config>>,
    headers: HeaderMap,

    ws: WebSocketUpgrade,
) -> Response {
    if !origin_allowed(&headers, &config.client_url) {
        warn!(origin = ?headers.get(ORIGIN), "refusing socket from foreign origin");
        return StatusCode::FORBIDDEN.into_response();
    }

    ws.on_upgrade(move |socket| serve_socket(socket, hub, verifier, config))
}

fn origin_allowed(headers: &HeaderMap, allowed: &str) -> bool {
    let Some(origin) = headers.get(ORIGIN) else {
        return true;
    };

    allowed == "*"
        || origin
            .to_str()
            .is_ok_and(|origin| origin.trim_end_matches('/') == allowed.trim_end_matches('/'))
}

async fn serve_socket(socket: WebSocket, hub: Hub, verifier: TokenVerifier, config: Arc<Config>) {
    let (mut sender, mut receiver) = socket.split();

    let token = match tokio::time::timeout(config.handshake_timeout, read_handshake(&mut receiver)).await {
        Ok(token) => token,
        Err(_) => {
            debug!("handshake timed out");
            None
        }
    };

    let principal = match verifier.verify(token.as_deref()) {
        Ok(principal) => principal,
        Err(err) => {
            info!(reason = %err, "connection rejected");
            reject(&mut sender, err).await;
            return;
        }
    };

    let conn_id = Uuid::now_v7();
    let Some(rx) = admit(&hub, conn_id, principal.clone(), config.outbox_capacity).await else {
        return;
    };
    info!(%conn_id, %principal, "user connected");

    let mut writer = tokio::spawn(write_outbox(sender, rx));

    let reader = async {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if hub.text(conn_id, text).await.is_err() {
                        break;
                    }
                }
                Message::Binary(_) => debug!(%conn_id, "ignoring binary frame"),
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    };

    tokio::select! {
        _ = reader => {}
        _ = &mut writer => {}
    }

    let _ = hub.disconnect(conn_id).await;
    writer.abort();
    info!(%conn_id, %principal, "user disconnected");
}

/// Waits for the handshake frame and pulls the bearer token out of it.
async fn read_handshake(receiver: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => return Handshake::token(text.as_str()),
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Binary(_) | Message::Close(_) => return None,
        }
    }
    None
}

async fn reject(sender: &mut SplitSink<WebSocket, Message>, err: AuthError) {
    let reason = err.to_string();
    if let Ok(frame) = protocol::encode(CONNECT_ERROR, &ConnectError { message: &reason }) {
        let _ = sender.send(Message::Text(frame)).await;
    }

    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: reason.into(),
        })))
        .await;
}

/// Registers the socket with the hub. The `connect` frame is queued first so
/// it goes out ahead of any room traffic.
async fn admit(hub: &Hub, conn_id: Uuid, principal: PrincipalId, capacity: usize) -> Option<mpsc::Receiver<Utf8Bytes>> {
    let (outbox, rx) = mpsc::channel(capacity);

    match protocol::encode(CONNECT, &Connected { id: conn_id }) {
        Ok(frame) => {
            let _ = outbox.try_send(frame);
        }
        Err(err) => {
            warn!(%conn_id, error = %err, "failed to encode connect frame");
            return None;
        }
    }

    if hub.admit(conn_id, principal, outbox).await.is_err() {
        warn!(%conn_id, "hub is gone, dropping socket");
        return None;
    }
    Some(rx)
}

async fn write_outbox(mut sender: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Utf8Bytes>) {
    while let Some(text) = rx.recv().await {
        if sender.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
    let _ = sender.close().await;
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn with_origin(origin: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ORIGIN, HeaderValue::from_str(origin).unwrap());
        headers
    }

    #[test]
    fn origin_policy() {
        assert!(origin_allowed(&HeaderMap::new(), "http://localhost:5173"));
        assert!(origin_allowed(&with_origin("http://localhost:5173"), "http://localhost:5173/"));
        assert!(origin_allowed(&with_origin("https://evil.example"), "*"));
        assert!(!origin_allowed(&with_origin("https://evil.example"), "http://localhost:5173"));
    }
}
