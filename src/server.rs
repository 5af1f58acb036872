//! MCP HTTP server.
//!
//! Serves the session router over HTTP. Every MCP message is a `POST` to
//! `/mcp`; the session id travels in the `mcp-session-id` header.
//!
//! # Endpoints
//!
//! | Method   | Path      | Description |
//! |----------|-----------|-------------|
//! | `POST`   | `/mcp`    | JSON-RPC request or notification |
//! | `GET`    | `/mcp`    | Server-to-client stream (not offered: 405) |
//! | `DELETE` | `/mcp`    | Close the session |
//! | `GET`    | `/health` | Health check (returns version) |
//!
//! Requests without a valid session id (other than `initialize`) get:
//!
//! ```json
//! {"jsonrpc":"2.0","error":{"code":-32000,"message":"Bad Request: No valid session ID provided"},"id":null}
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted, and `mcp-session-id` is
//! exposed so browser clients can read the id assigned at `initialize`.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::session::{RouterReply, SessionRouter, SESSION_HEADER};
use crate::tools::{ToolContext, ToolRegistry};

#[derive(Clone)]
struct AppState {
    router: Arc<SessionRouter>,
}

/// Bind `[server].bind` and serve until Ctrl-C.
pub async fn run_server(ctx: ToolContext) -> anyhow::Result<()> {
    let ctx = Arc::new(ctx);
    let bind_addr = ctx.config.server.bind.clone();
    let idle_secs = ctx.config.server.session_idle_timeout_secs;

    let router = Arc::new(SessionRouter::new(
        Arc::new(ToolRegistry::with_builtins()),
        ctx.clone(),
    ));
    if idle_secs > 0 {
        router.spawn_reaper(Duration::from_secs(idle_secs));
    }

    let listener = TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "MCP server listening on http://{}/mcp", bind_addr);

    axum::serve(listener, app(router.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    router.shutdown().await;
    ctx.store.close().await;
    info!("server stopped");
    Ok(())
}

/// Serve on an already-bound listener. Used by tests.
pub async fn serve(listener: TcpListener, router: Arc<SessionRouter>) -> anyhow::Result<()> {
    axum::serve(listener, app(router)).await?;
    Ok(())
}

/// Build the axum application around `router`.
pub fn app(router: Arc<SessionRouter>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(SESSION_HEADER)]);

    Router::new()
        .route(
            "/mcp",
            get(handle_get).post(handle_post).delete(handle_delete),
        )
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { router })
}

fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl IntoResponse for RouterReply {
    fn into_response(self) -> Response {
        let mut response = match self.body {
            Some(body) => (self.status, Json(body)).into_response(),
            None => self.status.into_response(),
        };
        if let Some(id) = self.session_id {
            if let Ok(value) = HeaderValue::from_str(&id) {
                response.headers_mut().insert(SESSION_HEADER, value);
            }
        }
        response
    }
}

async fn handle_post(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> RouterReply {
    state.router.handle_post(session_id(&headers), &body).await
}

async fn handle_get(State(state): State<AppState>, headers: HeaderMap) -> RouterReply {
    state.router.handle_get(session_id(&headers)).await
}

async fn handle_delete(State(state): State<AppState>, headers: HeaderMap) -> RouterReply {
    state.router.handle_delete(session_id(&headers)).await
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    sessions: usize,
}

async fn handle_health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            sessions: state.router.table().len().await,
        }),
    )
}
