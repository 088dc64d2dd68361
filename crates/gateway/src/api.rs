//! HTTP control surface for the loop.
//!
//! Endpoints:
//!
//! - `GET  /health`                 - Liveness
//! - `GET  /api/state`              - Current config and run state
//! - `GET  /api/history`            - Iteration history, oldest first
//! - `POST /api/config`             - Deep-merge a config patch
//! - `POST /api/start`              - Start the loop
//! - `POST /api/stop`               - Signal the loop to stop
//! - `POST /api/memory/working`     - Replace working memory
//! - `POST /api/memory/persistent`  - Replace persistent memory
//! - `GET  /api/models`             - Models offered by the runtime
//! - `GET  /api/events`             - SSE event stream
//! - `GET  /ws`                     - WebSocket event stream

use axum::{
    Router,
    extract::State,
    extract::rejection::JsonRejection,
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use pulseloop_agent::{LoopController, StartOutcome};
use pulseloop_core::{
    AgentGateway, BroadcastHub, IterationRecord, LoopConfig, LoopEvent, ModelInfo, RunState,
    Snapshot, Store,
};

// ── State ─────────────────────────────────────────────────────────────────

/// Everything the handlers need, built once per process.
pub struct ApiState {
    pub store: Arc<Store>,
    pub hub: Arc<BroadcastHub>,
    pub controller: Arc<LoopController>,
    pub gateway: Arc<dyn AgentGateway>,
}

pub type SharedApiState = Arc<ApiState>;

impl ApiState {
    pub fn new(controller: Arc<LoopController>, gateway: Arc<dyn AgentGateway>) -> Self {
        Self {
            store: Arc::clone(controller.store()),
            hub: Arc::clone(controller.hub()),
            controller,
            gateway,
        }
    }
}

/// Build the API router (no layers).
pub fn api_router(state: SharedApiState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/state", get(state_handler))
        .route("/api/history", get(history_handler))
        .route("/api/config", post(update_config_handler))
        .route("/api/start", post(start_handler))
        .route("/api/stop", post(stop_handler))
        .route("/api/memory/working", post(working_memory_handler))
        .route("/api/memory/persistent", post(persistent_memory_handler))
        .route("/api/models", get(models_handler))
        .route("/api/events", get(events_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

// ── DTOs ──────────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize, Deserialize)]
pub struct StartResponse {
    pub started: bool,
    pub state: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct StopResponse {
    pub stopped: bool,
}

#[derive(Deserialize)]
pub struct MemoryRequest {
    pub content: String,
}

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(error: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

async fn state_handler(State(state): State<SharedApiState>) -> Json<Snapshot> {
    Json(state.store.snapshot().await)
}

async fn history_handler(State(state): State<SharedApiState>) -> Json<Vec<IterationRecord>> {
    Json(state.store.history().await)
}

async fn update_config_handler(
    State(state): State<SharedApiState>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<LoopConfig>, ApiError> {
    let Json(patch) = payload.map_err(|e| bad_request(e.body_text()))?;

    match state.store.merge_config(&patch).await {
        Ok(config) => {
            info!("Configuration updated");
            state.hub.publish(&LoopEvent::Config {
                config: config.clone(),
            });
            Ok(Json(config))
        }
        Err(e) => {
            debug!(error = %e, "Rejected config update");
            Err(bad_request(e.to_string()))
        }
    }
}

async fn start_handler(State(state): State<SharedApiState>) -> Json<StartResponse> {
    let outcome = state.controller.start().await;
    let error = match &outcome {
        StartOutcome::Aborted(message) => Some(message.clone()),
        _ => None,
    };
    Json(StartResponse {
        started: outcome.started(),
        state: state.store.state().await,
        error,
    })
}

async fn stop_handler(State(state): State<SharedApiState>) -> Json<StopResponse> {
    Json(StopResponse {
        stopped: state.controller.stop().await,
    })
}

async fn working_memory_handler(
    State(state): State<SharedApiState>,
    payload: Result<Json<MemoryRequest>, JsonRejection>,
) -> Result<Json<LoopConfig>, ApiError> {
    let Json(request) = payload.map_err(|e| bad_request(e.body_text()))?;
    let config = state.store.set_working_memory(request.content).await;
    state.hub.publish(&LoopEvent::Config {
        config: config.clone(),
    });
    Ok(Json(config))
}

async fn persistent_memory_handler(
    State(state): State<SharedApiState>,
    payload: Result<Json<MemoryRequest>, JsonRejection>,
) -> Result<Json<LoopConfig>, ApiError> {
    let Json(request) = payload.map_err(|e| bad_request(e.body_text()))?;
    let config = state.store.set_persistent_memory(request.content).await;
    state.hub.publish(&LoopEvent::Config {
        config: config.clone(),
    });
    Ok(Json(config))
}

/// Best-effort: runtime failures yield an empty list.
async fn models_handler(State(state): State<SharedApiState>) -> Json<Vec<ModelInfo>> {
    match state.gateway.list_models().await {
        Ok(models) => Json(models),
        Err(e) => {
            warn!(error = %e, "Listing models failed");
            Json(Vec::new())
        }
    }
}

// ── Event streams ─────────────────────────────────────────────────────────

/// `GET /api/events` - one SSE event per loop event, `connected` first.
/// The SSE event name is the loop event's `type`.
async fn events_handler(
    State(state): State<SharedApiState>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let subscription = state.hub.subscribe().await;
    debug!(sink = subscription.id(), "SSE observer attached");

    let stream = ReceiverStream::new(subscription.into_receiver()).map(|frame| {
        Ok(SseEvent::default()
            .event(frame.kind)
            .data(frame.json.as_ref()))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// `GET /ws` - one text frame per loop event. Client frames are ignored.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedApiState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

async fn handle_ws_connection(mut socket: WebSocket, state: SharedApiState) {
    let mut subscription = state.hub.subscribe().await;
    let id = subscription.id();
    info!(sink = id, "WebSocket observer connected");

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(frame) = event else { break };
                if socket.send(WsMessage::Text(frame.json.as_ref().into())).await.is_err() {
                    break; // client disconnected
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            },
        }
    }

    state.hub.unsubscribe(id);
    info!(sink = id, "WebSocket observer closed");
}
