//! Tool dispatcher.
//!
//! Binds the `index` and `search` operations to the ingestion and
//! retrieval pipelines. Sessions call [`ToolRegistry::dispatch`]; the same
//! registry backs the HTTP and stdio transports.
//!
//! Pipeline failures never escape as errors: they come back as a
//! [`ToolOutcome`] with `is_error` set and a readable message. Only an
//! unknown tool name or malformed arguments are reported as `Err`, which
//! the session layer turns into a JSON-RPC error.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::ingest::{index_directory, IndexOptions, IndexReport};
use crate::models::SearchResultItem;
use crate::search::search;
use crate::store::Store;

/// Text result of a tool call, mapped to MCP `content` / `isError`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

/// A named operation exposed to clients.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Human-readable title shown by MCP clients.
    fn title(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the `arguments` object.
    fn parameters_schema(&self) -> Value;

    /// Run the tool.
    ///
    /// Returns `Err` only for malformed arguments; operational failures are
    /// an `Ok` outcome with `is_error` set.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutcome>;
}

/// Handles shared by every tool invocation.
///
/// Built once at startup and shared behind an `Arc`.
pub struct ToolContext {
    pub store: Arc<Store>,
    pub provider: Arc<dyn EmbeddingProvider>,
    pub config: Arc<Config>,
}

impl ToolContext {
    pub fn new(store: Arc<Store>, provider: Arc<dyn EmbeddingProvider>, config: Arc<Config>) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    /// Open the store and build the provider named by `config`.
    pub async fn open(config: Config) -> Result<Self> {
        let provider: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&config.embedding)?);
        let store = Store::open(&config).await?;
        Ok(Self::new(Arc::new(store), provider, Arc::new(config)))
    }

    /// Index `root`, returning only after the run has finished.
    pub async fn index(&self, root: &Path) -> Result<IndexReport> {
        let options = IndexOptions::from_config(&self.config);
        index_directory(&self.store, self.provider.as_ref(), &options, root).await
    }

    pub async fn search(
        &self,
        query: &str,
        path_prefix: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<SearchResultItem>> {
        search(
            &self.store,
            self.provider.as_ref(),
            query,
            path_prefix,
            limit.unwrap_or(self.config.retrieval.limit),
            Duration::from_secs(self.config.embedding.timeout_secs),
        )
        .await
    }
}

/// `index(path)`: crawl a directory and index its text files.
pub struct IndexTool;

#[async_trait]
impl Tool for IndexTool {
    fn name(&self) -> &str {
        "index"
    }

    fn title(&self) -> &str {
        "Index Directory"
    }

    fn description(&self) -> &str {
        "Index a local directory of .md and .txt files for semantic search"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory to index" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let path = required_str(&params, "path")?;

        let outcome = match ctx.index(Path::new(path)).await {
            Ok(report) if report.is_success() => {
                ToolOutcome::ok(format!("Successfully indexed {} ({})", path, report.summary()))
            }
            Ok(report) => {
                let detail = report
                    .first_failure()
                    .map(|f| format!("{}: {}", f.path, f.cause))
                    .unwrap_or_default();
                ToolOutcome::error(format!(
                    "Error indexing {}: {} ({})",
                    path,
                    detail,
                    report.summary()
                ))
            }
            Err(e) => {
                warn!(path, error = %e, "index tool failed");
                ToolOutcome::error(format!("Error indexing {}: {}", path, e))
            }
        };
        Ok(outcome)
    }
}

/// `search(query, path?, limit?)`: ranked chunks as pretty JSON.
pub struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn title(&self) -> &str {
        "Search Documents"
    }

    fn description(&self) -> &str {
        "Search indexed documents by semantic similarity"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "path": { "type": "string", "description": "Only search documents under this path prefix" },
                "limit": { "type": "integer", "minimum": 1, "description": "Max results" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let query = required_str(&params, "query")?;
        let path = optional_str(&params, "path")?;
        let limit = match params.get("limit") {
            None | Some(Value::Null) => None,
            Some(v) => match v.as_u64() {
                Some(n) if n >= 1 => Some(n as usize),
                _ => {
                    return Err(Error::InvalidArgument(
                        "'limit' must be a positive integer".to_string(),
                    ))
                }
            },
        };

        let outcome = match ctx.search(query, path, limit).await {
            Ok(results) => match serde_json::to_string_pretty(&results) {
                Ok(text) => ToolOutcome::ok(text),
                Err(e) => ToolOutcome::error(format!("Error searching: {}", e)),
            },
            Err(e) => {
                warn!(error = %e, "search tool failed");
                ToolOutcome::error(format!("Error searching: {}", e))
            }
        };
        Ok(outcome)
    }
}

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidArgument(format!("missing string argument '{}'", key)))
}

fn optional_str<'a>(params: &'a Value, key: &str) -> Result<Option<&'a str>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(Error::InvalidArgument(format!(
            "argument '{}' must be a string",
            key
        ))),
    }
}

/// The set of tools a session can call.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry with `index` and `search`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(IndexTool));
        registry.register(Box::new(SearchTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Tool descriptors in MCP `tools/list` shape.
    pub fn descriptors(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name(),
                    "title": t.title(),
                    "description": t.description(),
                    "inputSchema": t.parameters_schema(),
                })
            })
            .collect()
    }

    /// Run the tool called `name`.
    ///
    /// An unknown name is [`Error::InvalidArgument`], as are arguments that
    /// are not a JSON object.
    pub async fn dispatch(&self, name: &str, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let tool = self
            .find(name)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown tool: {}", name)))?;
        let args = match args {
            Value::Null => json!({}),
            Value::Object(_) => args,
            _ => {
                return Err(Error::InvalidArgument(
                    "tool arguments must be an object".to_string(),
                ))
            }
        };
        tool.execute(args, ctx).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
