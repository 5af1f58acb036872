//! Session-multiplexed MCP request routing.
//!
//! Every client connection is bound to a server-assigned session id. The
//! lifecycle of one id is:
//!
//! ```text
//!   (no id) --initialize--> Bound --DELETE / idle reaper--> Closed
//! ```
//!
//! - A request without an id is accepted only if it is an `initialize`
//!   request. It gets a fresh UUID v4 id, a new [`McpSession`], and the id
//!   is returned to the client in the `mcp-session-id` header.
//! - A request with a known id is dispatched to that session's transport.
//! - Anything else gets HTTP 400 with a fixed `-32000` error and `id: null`.
//!   Rejected requests never create a binding.
//!
//! The [`SessionTable`] is the single source of truth for bindings. Inserts
//! refuse to overwrite an existing id, so concurrent handshakes can never
//! clobber each other. Closing is observed at most once per session.
//!
//! [`SessionRouter`] is transport-agnostic: it takes the session header and
//! the raw body and returns a [`RouterReply`]. The axum handlers in
//! `server` only translate that into an HTTP response.

use axum::http::StatusCode;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::{
    JsonRpcRequest, JsonRpcResponse, ToolResult, INTERNAL_ERROR, INVALID_PARAMS,
    INVALID_REQUEST, JSONRPC_VERSION, METHOD_NOT_FOUND, PARSE_ERROR, PROTOCOL_VERSION,
};
use crate::tools::{ToolContext, ToolRegistry};

/// Header carrying the session id in both directions.
pub const SESSION_HEADER: &str = "mcp-session-id";

pub const SERVER_NAME: &str = "local-docs-mcp";

/// The `initialize` result advertised to every client.
pub fn server_info() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
        "instructions": "Use `index` to index a directory of .md/.txt files, then `search` to query it."
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Per-session transport
// ═══════════════════════════════════════════════════════════════════════

/// The MCP protocol handler bound to one session id.
pub struct McpSession {
    registry: Arc<ToolRegistry>,
    ctx: Arc<ToolContext>,
    handshake_done: AtomicBool,
    client_ready: AtomicBool,
}

impl McpSession {
    pub fn new(registry: Arc<ToolRegistry>, ctx: Arc<ToolContext>) -> Self {
        Self {
            registry,
            ctx,
            handshake_done: AtomicBool::new(false),
            client_ready: AtomicBool::new(false),
        }
    }

    /// Whether the client has sent `notifications/initialized`.
    pub fn is_ready(&self) -> bool {
        self.client_ready.load(Ordering::Acquire)
    }

    /// Handle one message. Returns `None` for notifications.
    pub async fn handle(&self, req: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if req.is_notification() {
            self.handle_notification(&req);
            return None;
        }

        let id = req.id.clone();
        let response = match req.method.as_str() {
            "initialize" => self.initialize(&req),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(
                id,
                json!({ "tools": self.registry.descriptors() }),
            ),
            "tools/call" => self.call_tool(id, req.params).await,
            other => JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                &format!("Method not found: {}", other),
            ),
        };
        Some(response)
    }

    /// Answer the handshake. Only the first `initialize` succeeds.
    fn initialize(&self, req: &JsonRpcRequest) -> JsonRpcResponse {
        if !matches!(req.params, Value::Object(_) | Value::Null) {
            return JsonRpcResponse::error(
                req.id.clone(),
                INVALID_PARAMS,
                "initialize params must be an object",
            );
        }
        if self
            .handshake_done
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return JsonRpcResponse::error(
                req.id.clone(),
                INVALID_REQUEST,
                "Invalid Request: Server already initialized",
            );
        }
        JsonRpcResponse::success(req.id.clone(), server_info())
    }

    fn handle_notification(&self, req: &JsonRpcRequest) {
        match req.method.as_str() {
            "notifications/initialized" => self.client_ready.store(true, Ordering::Release),
            other => debug!(method = other, "ignoring notification"),
        }
    }

    async fn call_tool(&self, id: Option<Value>, params: Value) -> JsonRpcResponse {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return JsonRpcResponse::error(id, INVALID_PARAMS, "Missing tool name");
        };
        let args = params.get("arguments").cloned().unwrap_or(Value::Null);

        match self.registry.dispatch(name, args, &self.ctx).await {
            Ok(outcome) => {
                let result = ToolResult::text(outcome.text, outcome.is_error);
                match serde_json::to_value(result) {
                    Ok(value) => JsonRpcResponse::success(id, value),
                    Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, &e.to_string()),
                }
            }
            Err(e) => JsonRpcResponse::error(id, INVALID_PARAMS, &e.to_string()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Session table
// ═══════════════════════════════════════════════════════════════════════

/// One bound session.
pub struct Session {
    id: String,
    transport: McpSession,
    created: Instant,
    last_seen_ms: AtomicU64,
    closed: AtomicBool,
}

impl Session {
    fn new(id: String, transport: McpSession) -> Self {
        Self {
            id,
            transport,
            created: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn transport(&self) -> &McpSession {
        &self.transport
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark closed. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    fn touch(&self) {
        let elapsed = self.created.elapsed().as_millis() as u64;
        self.last_seen_ms.store(elapsed, Ordering::Release);
    }

    /// Time since the last request on this session.
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_seen_ms.load(Ordering::Acquire));
        self.created.elapsed().saturating_sub(last)
    }
}

/// Concurrency-safe map from session id to session.
#[derive(Default)]
pub struct SessionTable {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `session` under its id. Fails if the id is already bound.
    pub async fn insert(&self, session: Arc<Session>) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(session.id()) {
            return Err(Error::Protocol(format!(
                "session id {} already bound",
                session.id()
            )));
        }
        sessions.insert(session.id().to_string(), session);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Ids of sessions idle for at least `max_idle`.
    pub async fn idle_ids(&self, max_idle: Duration) -> Vec<String> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.idle_for() >= max_idle)
            .map(|s| s.id().to_string())
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Router
// ═══════════════════════════════════════════════════════════════════════

/// Transport-agnostic reply: status, the session id to echo (if any) and
/// an optional JSON-RPC body.
#[derive(Debug)]
pub struct RouterReply {
    pub status: StatusCode,
    pub session_id: Option<String>,
    pub body: Option<JsonRpcResponse>,
}

impl RouterReply {
    fn json(status: StatusCode, session_id: Option<String>, body: JsonRpcResponse) -> Self {
        Self {
            status,
            session_id,
            body: Some(body),
        }
    }

    fn empty(status: StatusCode, session_id: Option<String>) -> Self {
        Self {
            status,
            session_id,
            body: None,
        }
    }

    fn no_valid_session() -> Self {
        Self::json(
            StatusCode::BAD_REQUEST,
            None,
            JsonRpcResponse::no_valid_session(),
        )
    }

    fn bad_request(id: Option<Value>, code: i32, message: &str) -> Self {
        Self::json(
            StatusCode::BAD_REQUEST,
            None,
            JsonRpcResponse::error(id, code, message),
        )
    }
}

/// Routes requests to sessions, creating and tearing them down.
pub struct SessionRouter {
    table: SessionTable,
    registry: Arc<ToolRegistry>,
    ctx: Arc<ToolContext>,
}

impl SessionRouter {
    pub fn new(registry: Arc<ToolRegistry>, ctx: Arc<ToolContext>) -> Self {
        Self {
            table: SessionTable::new(),
            registry,
            ctx,
        }
    }

    pub fn table(&self) -> &SessionTable {
        &self.table
    }

    /// Handle a POSTed JSON-RPC message.
    pub async fn handle_post(&self, session_id: Option<&str>, body: &[u8]) -> RouterReply {
        let value: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => {
                return RouterReply::bad_request(
                    None,
                    PARSE_ERROR,
                    &format!("Parse error: {}", e),
                )
            }
        };
        if value.is_array() {
            return RouterReply::bad_request(
                None,
                INVALID_REQUEST,
                "Invalid Request: batch requests are not supported",
            );
        }
        let id = value.get("id").cloned().filter(|v| !v.is_null());
        let req: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                return RouterReply::bad_request(
                    id,
                    INVALID_REQUEST,
                    &format!("Invalid Request: {}", e),
                )
            }
        };
        if req.jsonrpc != JSONRPC_VERSION {
            return RouterReply::bad_request(
                req.id,
                INVALID_REQUEST,
                "Invalid Request: jsonrpc must be \"2.0\"",
            );
        }

        match session_id {
            Some(sid) => self.dispatch(sid, req).await,
            None if req.is_initialize() && !req.is_notification() => self.create(req).await,
            None => {
                warn!(method = %req.method, "rejected request without session id");
                RouterReply::no_valid_session()
            }
        }
    }

    /// GET opens a server-to-client stream, which this server does not offer.
    pub async fn handle_get(&self, session_id: Option<&str>) -> RouterReply {
        match self.lookup(session_id).await {
            Some(session) => RouterReply::empty(
                StatusCode::METHOD_NOT_ALLOWED,
                Some(session.id().to_string()),
            ),
            None => RouterReply::no_valid_session(),
        }
    }

    /// Explicit teardown.
    pub async fn handle_delete(&self, session_id: Option<&str>) -> RouterReply {
        match session_id {
            Some(sid) if self.close_session(sid).await => RouterReply::empty(StatusCode::OK, None),
            _ => RouterReply::no_valid_session(),
        }
    }

    /// Remove and close a session. Returns `false` if it was not bound.
    pub async fn close_session(&self, id: &str) -> bool {
        let Some(session) = self.table.remove(id).await else {
            return false;
        };
        if session.close() {
            info!(session = id, "session closed");
        }
        true
    }

    /// Close every session idle for at least `max_idle`.
    pub async fn reap_idle(&self, max_idle: Duration) -> usize {
        let mut closed = 0;
        for id in self.table.idle_ids(max_idle).await {
            if self.close_session(&id).await {
                closed += 1;
            }
        }
        closed
    }

    /// Periodically reap idle sessions until the router is dropped.
    pub fn spawn_reaper(self: &Arc<Self>, max_idle: Duration) -> tokio::task::JoinHandle<()> {
        let router = Arc::downgrade(self);
        let period = (max_idle / 2).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(router) = router.upgrade() else {
                    break;
                };
                let reaped = router.reap_idle(max_idle).await;
                if reaped > 0 {
                    info!(reaped, "closed idle sessions");
                }
            }
        })
    }

    /// Close all sessions at shutdown.
    pub async fn shutdown(&self) {
        for id in self.table.idle_ids(Duration::ZERO).await {
            self.close_session(&id).await;
        }
    }

    async fn lookup(&self, session_id: Option<&str>) -> Option<Arc<Session>> {
        let session = self.table.get(session_id?).await?;
        if session.is_closed() {
            return None;
        }
        Some(session)
    }

    async fn dispatch(&self, sid: &str, req: JsonRpcRequest) -> RouterReply {
        let Some(session) = self.lookup(Some(sid)).await else {
            warn!(session = sid, method = %req.method, "rejected request for unknown session");
            return RouterReply::no_valid_session();
        };
        session.touch();

        let echo = Some(session.id().to_string());
        match session.transport().handle(req).await {
            Some(response) => RouterReply::json(StatusCode::OK, echo, response),
            None => RouterReply::empty(StatusCode::ACCEPTED, echo),
        }
    }

    async fn create(&self, req: JsonRpcRequest) -> RouterReply {
        let transport = McpSession::new(self.registry.clone(), self.ctx.clone());
        let response = transport.initialize(&req);
        if response.error.is_some() {
            return RouterReply::json(StatusCode::BAD_REQUEST, None, response);
        }

        let id = Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(id.clone(), transport));
        if let Err(e) = self.table.insert(session).await {
            warn!(error = %e, "could not bind new session");
            return RouterReply::json(
                StatusCode::INTERNAL_SERVER_ERROR,
                None,
                JsonRpcResponse::error(req.id, INTERNAL_ERROR, "could not allocate session"),
            );
        }

        info!(session = %id, "session initialized");
        RouterReply::json(StatusCode::OK, Some(id), response)
    }
}
