//! # Bridge Server
//!
//! HTTP surface of the engine.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  POST /rpc      {method, params} ──► Dispatcher ──► {status, ...}       │
//! │  GET  /events   WebSocket, one text frame per {event, payload}          │
//! │  GET  /health   "OK" while the database answers                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use titan_db::Database;
use titan_inventory::{Dispatcher, ErrorCode, EventEnvelope, Request, Response};

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub events: broadcast::Sender<EventEnvelope>,
    pub db: Database,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/rpc", post(rpc_handler))
        .route("/events", get(events_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

/// Always answers 200 with a dispatch envelope, even for a malformed body.
async fn rpc_handler(
    State(state): State<AppState>,
    body: Result<Json<Request>, JsonRejection>,
) -> Json<Response> {
    match body {
        Ok(Json(request)) => Json(state.dispatcher.handle(request).await),
        Err(rejection) => {
            debug!(error = %rejection, "Rejected malformed request envelope");
            Json(Response::error(
                ErrorCode::InvalidParams,
                format!("Invalid request: {}", rejection.body_text()),
            ))
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.db.health_check().await {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "DATABASE UNAVAILABLE")
    }
}

async fn events_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let events = state.events.subscribe();
    ws.on_upgrade(move |socket| stream_events(socket, events))
}

// =============================================================================
// Event Stream
// =============================================================================

/// Forwards engine events to one socket until either side goes away.
async fn stream_events(socket: WebSocket, mut events: broadcast::Receiver<EventEnvelope>) {
    let (mut sender, mut receiver) = socket.split();
    info!("Event subscriber connected");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(envelope) => {
                    let json = match serde_json::to_string(&envelope) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(?e, event = %envelope.event, "Failed to encode event");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(?e, "Event socket error");
                    break;
                }
            },
        }
    }

    info!("Event subscriber disconnected");
}
