//! Plain HTTP JSON surface.
//!
//! Exposes the tool protocol over HTTP for clients that do not speak the
//! stdio transport.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness check |
//! | `GET`  | `/mcp/tools` | List tools with input schemas |
//! | `POST` | `/mcp/tools/call` | Invoke one tool |
//!
//! The call endpoint takes `{"name": ..., "arguments": {...}}` and returns
//! the protocol envelope (`{content, isError}`) with HTTP 200 even for
//! handler errors — transport-level failures are the only non-200s.
//!
//! # CORS
//!
//! `*` origin, `GET, POST, OPTIONS`, `Content-Type` — enough for browser
//! clients without opening custom headers up.

use axum::http::{header, Method};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::tools::{ModuleManager, ToolResponse};

#[derive(Clone)]
struct AppState {
    manager: Arc<ModuleManager>,
}

/// Serve the HTTP surface until `shutdown` fires.
pub async fn run_server(
    manager: Arc<ModuleManager>,
    addr: &str,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let state = AppState { manager };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/mcp/tools", get(handle_list_tools))
        .route("/mcp/tools/call", post(handle_call))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr, "HTTP surface listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn handle_health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "tools": state.manager.list_tools() }))
}

/// One tool-protocol request.
#[derive(Deserialize)]
pub struct CallRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

async fn handle_call(
    State(state): State<AppState>,
    Json(request): Json<CallRequest>,
) -> Json<ToolResponse> {
    let response = state
        .manager
        .call(&request.name, request.arguments, CancellationToken::new())
        .await;
    Json(response)
}
