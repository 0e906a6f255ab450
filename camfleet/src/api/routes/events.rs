//! Detection push channel.
//!
//! Observers connect to `/ws` and receive JSON text frames: one `snapshot`
//! with the current state of every live stream, then a `detection` frame for
//! each recognized detector line. `?streamId=` limits the feed to one stream.

use std::time::Duration;

use axum::{
    Router,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::api::server::AppState;
use crate::events::{DetectionEvent, PushMessage};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsParams {
    #[serde(default)]
    pub stream_id: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(detection_ws))
}

async fn detection_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.stream_id))
}

fn matches_filter(event: &DetectionEvent, filter: Option<&str>) -> bool {
    filter.is_none_or(|id| event.stream_id == id)
}

fn encode(message: &PushMessage) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            warn!("Failed to encode push message: {}", e);
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, filter: Option<String>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before taking the snapshot so no transition falls in between.
    let mut event_rx = state.stream_manager.subscribe();

    let snapshot: Vec<DetectionEvent> = state
        .stream_manager
        .detection_snapshot()
        .into_iter()
        .filter(|e| matches_filter(e, filter.as_deref()))
        .collect();
    if let Some(frame) = encode(&PushMessage::Snapshot(snapshot))
        && sender.send(frame).await.is_err()
    {
        debug!("Observer left before the snapshot was sent");
        return;
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => awaiting_pong = false,
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                    // Observers only listen.
                    _ => {}
                }
            }

            event = event_rx.recv() => {
                match event {
                    Ok(event) => {
                        if !matches_filter(&event, filter.as_deref()) {
                            continue;
                        }
                        if let Some(frame) = encode(&PushMessage::Detection(event))
                            && sender.send(frame).await.is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Detection observer lagged by {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            _ = heartbeat.tick() => {
                if awaiting_pong {
                    debug!("Observer missed a heartbeat, closing connection");
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }
        }
    }

    let _ = sender.close().await;
}
