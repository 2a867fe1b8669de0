//! HTTP + websocket front end
//!
//! - `GET /ws-execute` upgrades to the interactive session protocol
//! - `POST /api/execute` runs code once with pre-supplied input
//! - `GET /health` reports runtime and live session count

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use playground_common::{ExecuteRequest, ExecuteResponse, ServerMessage};
use playground_sandbox::SandboxService;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::handler::{InboundFrame, SessionHandler};

/// Shared state for the router
#[derive(Clone)]
pub struct AppState {
    service: SandboxService,
    event_buffer: usize,
}

impl AppState {
    pub fn new(service: SandboxService, event_buffer: usize) -> Self {
        Self {
            service,
            event_buffer: event_buffer.max(1),
        }
    }

    pub fn service(&self) -> &SandboxService {
        &self.service
    }
}

/// Create the playground router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws-execute", get(handle_ws_upgrade))
        .route("/api/execute", post(handle_execute))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the playground on an already-bound listener
pub async fn start_server(listener: tokio::net::TcpListener, state: AppState) -> Result<()> {
    let app = create_router(state);

    let bind_addr = listener
        .local_addr()
        .context("Failed to obtain server bind address")?;
    info!("Starting playground server on {}", bind_addr);

    axum::serve(listener, app)
        .await
        .context("Playground server error")?;

    Ok(())
}

async fn handle_ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("WebSocket client connected");
    let (mut sink, stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.event_buffer);

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                debug!("websocket send failed, client gone");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let inbound = stream.filter_map(|frame| async move {
        match frame {
            Ok(Message::Text(text)) => Some(InboundFrame::Text(text)),
            Ok(Message::Binary(_)) => Some(InboundFrame::Binary),
            Ok(Message::Close(_)) => Some(InboundFrame::Close),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
            Err(e) => {
                debug!("websocket receive error: {}", e);
                Some(InboundFrame::Close)
            }
        }
    });

    SessionHandler::new(state.service.clone(), tx)
        .run(Box::pin(inbound))
        .await;

    if let Err(e) = writer.await {
        error!("websocket writer task failed: {}", e);
    }
    info!("WebSocket client disconnected");
}

async fn handle_execute(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, (StatusCode, Json<Value>)> {
    if request.code.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Code is required" })),
        ));
    }

    debug!(code_len = request.code.len(), "One-shot execution requested");
    Ok(Json(state.service.execute(request).await))
}

async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "runtime": state.service.runtime_name(),
        "active_sessions": state.service.registry().len().await,
    }))
}
