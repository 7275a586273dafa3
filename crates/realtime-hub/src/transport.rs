//! WebSocket transport.
//!
//! Clients connect to `GET /ws` with their identity in the query string:
//! `userId` (plus optional `displayName`) for authenticated users, or
//! `displayName` alone for guests. Connections presenting neither are
//! refused with 401 before the upgrade. Each accepted socket gets a
//! reader loop feeding commands into the hub and a writer task draining
//! the connection's event queue; either side ending tears both down and
//! runs the disconnect pipeline exactly once.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use common::types::{ConnectionId, DeviceId, Identity, UserId};

use crate::client::ClientHandle;
use crate::config::Config;
use crate::events::ClientCommand;
use crate::hub::Hub;

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    hub: Arc<Hub>,
    config: Arc<Config>,
}

/// Build the router serving the WebSocket endpoint and health checks
pub fn router(hub: Arc<Hub>, config: Arc<Config>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { hub, config })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectParams {
    user_id: Option<String>,
    display_name: Option<String>,
    device_id: Option<String>,
}

fn identity_from(params: &ConnectParams) -> Option<Identity> {
    match (&params.user_id, &params.display_name) {
        (Some(user_id), display_name) if !user_id.is_empty() => Some(Identity::User {
            user_id: UserId::new(user_id.clone()),
            display_name: display_name
                .clone()
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| user_id.clone()),
        }),
        (None | Some(_), Some(display_name)) if !display_name.is_empty() => {
            Some(Identity::Guest {
                display_name: display_name.clone(),
            })
        }
        _ => None,
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    let Some(identity) = identity_from(&params) else {
        warn!(target: "hub.transport", "Connection refused: no identity presented");
        return (StatusCode::UNAUTHORIZED, "authentication missing").into_response();
    };
    // Clients without a stable device ID get a throwaway one: they still
    // work, they just cannot be targeted across reconnects.
    let device_id = DeviceId::new(
        params
            .device_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
    );
    let queue_depth = state.config.send_queue_depth;
    ws.on_upgrade(move |socket| client_session(socket, state.hub, identity, device_id, queue_depth))
}

async fn client_session(
    socket: WebSocket,
    hub: Arc<Hub>,
    identity: Identity,
    device_id: DeviceId,
    queue_depth: usize,
) {
    let connection_id = ConnectionId::new();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (handle, mut events) = ClientHandle::channel(connection_id, queue_depth);

    hub.connect(identity, device_id, handle).await;

    let writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(text) => {
                    if ws_tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(
                        target: "hub.transport",
                        error = %err,
                        "Failed to serialize outbound event"
                    );
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientCommand>(&text) {
                Ok(command) => hub.handle_command(connection_id, command).await,
                Err(err) => {
                    debug!(
                        target: "hub.transport",
                        connection_id = %connection_id,
                        error = %err,
                        "Malformed command frame"
                    );
                    hub.report_protocol_error(connection_id, "Malformed command".to_string());
                }
            },
            Ok(Message::Close(_)) => break,
            // Pings are answered by axum; binary frames are not part of
            // the protocol.
            Ok(_) => {}
            Err(err) => {
                debug!(
                    target: "hub.transport",
                    connection_id = %connection_id,
                    error = %err,
                    "Socket error, closing"
                );
                break;
            }
        }
    }

    hub.disconnect(connection_id).await;
    writer.abort();
    info!(
        target: "hub.transport",
        connection_id = %connection_id,
        "Session ended"
    );
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "hub_id": state.config.hub_id,
        "metrics": state.hub.metrics().snapshot(),
    }))
}
