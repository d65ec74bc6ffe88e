//! HTTP and WebSocket handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};

use aroma_core::{ChannelStatus, ClientMessage, FanError, ServerMessage, StatusSnapshot};

use crate::state::AppState;

pub type SharedState = Arc<AppState>;

/// Fan errors mapped onto HTTP status codes
pub struct ApiError(FanError);

impl From<FanError> for ApiError {
    fn from(e: FanError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FanError::UnknownFan(_) => StatusCode::NOT_FOUND,
            FanError::InvalidDuration(_) => StatusCode::BAD_REQUEST,
            FanError::HardwareFault { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "detail": self.0.to_string() }))).into_response()
    }
}

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "aroma-server"
    }))
}

#[derive(Deserialize)]
pub struct TurnOnParams {
    duration_seconds: f64,
}

/// Result of a turn-on / turn-off request
#[derive(Serialize)]
pub struct FanResponse {
    success: bool,
    message: String,
    fan: ChannelStatus,
}

pub async fn turn_on_handler(
    State(state): State<SharedState>,
    Path(fan_id): Path<u32>,
    Query(params): Query<TurnOnParams>,
) -> Result<Json<FanResponse>, ApiError> {
    let fan = state
        .controller
        .turn_on(fan_id, params.duration_seconds)
        .await?;
    state.publish_status().await;

    Ok(Json(FanResponse {
        success: true,
        message: format!(
            "Fan {} turned on for {} seconds",
            fan_id, params.duration_seconds
        ),
        fan,
    }))
}

pub async fn turn_off_handler(
    State(state): State<SharedState>,
    Path(fan_id): Path<u32>,
) -> Result<Json<FanResponse>, ApiError> {
    let fan = state.controller.turn_off(fan_id).await?;
    state.publish_status().await;

    Ok(Json(FanResponse {
        success: true,
        message: format!("Fan {} turned off", fan_id),
        fan,
    }))
}

pub async fn status_handler(State(state): State<SharedState>) -> Json<StatusSnapshot> {
    Json(state.controller.status_all().await)
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

/// Stream status snapshots to one client until it goes away
async fn handle_websocket(socket: WebSocket, state: SharedState) {
    let (sender, mut receiver) = socket.split();

    let mut subscription = state.broadcaster.subscribe().await;
    let client_id = subscription.id;
    tracing::info!("New WebSocket connection: {}", client_id);

    // Forward snapshots to the client
    let sender = Arc::new(tokio::sync::Mutex::new(sender));
    let sender_for_broadcast = Arc::clone(&sender);
    let broadcast_handle = tokio::spawn(async move {
        while let Some(msg) = subscription.recv().await {
            let Ok(json) = serde_json::to_string(&msg) else {
                continue;
            };
            let mut s = sender_for_broadcast.lock().await;
            if s.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Main message loop
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let response = match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(ClientMessage::Subscribe) => None,
                    Ok(ClientMessage::Ping) => Some(ServerMessage::Pong),
                    Err(e) => {
                        tracing::warn!("Invalid message from {}: {}", client_id, e);
                        Some(ServerMessage::Error {
                            message: format!("Invalid message: {}", e),
                        })
                    }
                };

                if let Some(resp) = response {
                    let mut s = sender.lock().await;
                    if let Ok(json) = serde_json::to_string(&resp) {
                        if s.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::debug!("WebSocket error from {}: {}", client_id, e);
                break;
            }
            _ => {}
        }
    }

    // Cleanup
    broadcast_handle.abort();
    state.broadcaster.unsubscribe(client_id).await;
    tracing::info!("Client {} disconnected", client_id);
}
