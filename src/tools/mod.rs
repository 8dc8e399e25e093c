//! Tool surface and module registry.
//!
//! A tool is `(name, input-schema, handler)`: arguments decode into typed
//! structs, results serialize to JSON and travel as textual content in the
//! protocol envelope (`{content: [{type: "text", text}], isError}`). A
//! handler error never kills the process — it becomes `isError = true`.
//!
//! Modules group tools and own their lifecycle: the [`ModuleManager`]
//! provisions each enabled module with the shared dependencies, validates
//! it, collects its tools, and calls `cleanup()` on shutdown. A middleware
//! chain wraps every call in priority order; middleware select their tools
//! with suffix-wildcard patterns (`memory_*`, `*`).

pub mod code;
pub mod events;
pub mod graph;
pub mod help;
pub mod kb;
pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::indexer::CodeIndexer;
use crate::store::MemoryStore;

// ═══════════════════════════════════════════════════════════════════════
// Protocol envelope
// ═══════════════════════════════════════════════════════════════════════

/// One content element of a tool response.
#[derive(Debug, Clone, Serialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

/// The protocol response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl ToolResponse {
    /// Wrap a successful result as textual JSON content.
    pub fn ok(value: &Value) -> Self {
        Self {
            content: vec![ToolContent {
                content_type: "text".to_string(),
                text: serde_json::to_string(value).unwrap_or_else(|_| "null".to_string()),
            }],
            is_error: false,
        }
    }

    /// Wrap an error message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent {
                content_type: "text".to_string(),
                text: message.into(),
            }],
            is_error: true,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Tool trait and context
// ═══════════════════════════════════════════════════════════════════════

/// Shared dependencies handed to every module at provisioning time and to
/// every tool call through [`ToolContext`].
#[derive(Clone)]
pub struct SharedDeps {
    pub store: MemoryStore,
    pub indexer: CodeIndexer,
}

/// Per-call execution context: the shared dependencies plus the caller's
/// cancellation token.
pub struct ToolContext {
    pub deps: SharedDeps,
    pub cancel: CancellationToken,
    /// Tool/module documentation for the discoverability tool.
    pub catalog: Arc<Catalog>,
}

/// A remotely callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier with underscores (e.g. `memory_save_fact`).
    fn name(&self) -> &str;

    /// One-line description used for agent discovery.
    fn description(&self) -> &str;

    /// JSON Schema of the arguments object.
    fn parameters_schema(&self) -> Value;

    /// Execute with decoded parameters. Errors become `isError` responses.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Decode tool arguments into a typed struct with a uniform error shape.
pub fn decode_args<T: serde::de::DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| Error::Validation(e.to_string()))
}

// ═══════════════════════════════════════════════════════════════════════
// Modules
// ═══════════════════════════════════════════════════════════════════════

/// Static identity of a module.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub version: &'static str,
}

/// A group of tools with a lifecycle.
#[async_trait]
pub trait ToolModule: Send + Sync {
    fn info(&self) -> ModuleInfo;

    /// Receive the shared dependencies. Called once, before `validate`.
    fn provision(&mut self, deps: &SharedDeps) -> Result<()>;

    /// Check that the module can operate (configuration, reachable state).
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>>;

    /// Release resources (watchers, workers). Called once at shutdown.
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

/// Compile-time registration of the built-in modules.
fn builtin_modules() -> Vec<Box<dyn ToolModule>> {
    vec![
        Box::new(memory::MemoryModule::default()),
        Box::new(kb::KbModule::default()),
        Box::new(graph::GraphModule::default()),
        Box::new(events::EventsModule::default()),
        Box::new(code::CodeModule::default()),
        Box::new(help::HelpModule::default()),
    ]
}

// ═══════════════════════════════════════════════════════════════════════
// Middleware
// ═══════════════════════════════════════════════════════════════════════

/// Pre/post hook around tool execution.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    /// Lower priorities run first on the way in (and last on the way out).
    fn priority(&self) -> i32;

    /// Suffix-wildcard filter: `*`, `memory_*`, or an exact name.
    fn pattern(&self) -> &str;

    async fn before(&self, _tool: &str, params: Value) -> Result<Value> {
        Ok(params)
    }

    async fn after(&self, _tool: &str, result: Value) -> Result<Value> {
        Ok(result)
    }
}

/// Match a suffix-wildcard pattern against a tool name.
pub fn pattern_matches(pattern: &str, name: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => pattern == name,
    }
}

/// Rejects non-object argument payloads before they reach handlers.
struct ArgumentShapeMiddleware;

#[async_trait]
impl Middleware for ArgumentShapeMiddleware {
    fn name(&self) -> &str {
        "argument-shape"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn pattern(&self) -> &str {
        "*"
    }

    async fn before(&self, _tool: &str, params: Value) -> Result<Value> {
        match params {
            Value::Null => Ok(Value::Object(serde_json::Map::new())),
            Value::Object(_) => Ok(params),
            other => Err(Error::Validation(format!(
                "arguments must be an object, got {}",
                kind_of(&other)
            ))),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Annotates successful object results with the handler's elapsed time.
struct TimingMiddleware;

#[async_trait]
impl Middleware for TimingMiddleware {
    fn name(&self) -> &str {
        "timing"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn pattern(&self) -> &str {
        "*"
    }

    async fn before(&self, _tool: &str, mut params: Value) -> Result<Value> {
        if let Value::Object(map) = &mut params {
            map.insert(
                "__started_at_ms".to_string(),
                Value::from(chrono::Utc::now().timestamp_millis()),
            );
        }
        Ok(params)
    }

    async fn after(&self, _tool: &str, result: Value) -> Result<Value> {
        Ok(result)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Catalog (discoverability)
// ═══════════════════════════════════════════════════════════════════════

/// Documentation snapshot built after provisioning, served by
/// `how_to_use` so agents can keep their per-call context small.
#[derive(Debug, Clone, Serialize, Default)]
pub struct Catalog {
    pub modules: Vec<CatalogModule>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogModule {
    #[serde(flatten)]
    pub info: ModuleInfo,
    pub tools: Vec<CatalogTool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl Catalog {
    pub fn find_module(&self, id: &str) -> Option<&CatalogModule> {
        self.modules.iter().find(|m| m.info.id == id)
    }

    pub fn find_tool(&self, name: &str) -> Option<(&CatalogModule, &CatalogTool)> {
        for module in &self.modules {
            if let Some(tool) = module.tools.iter().find(|t| t.name == name) {
                return Some((module, tool));
            }
        }
        None
    }
}

/// A tool descriptor as listed by `GET /mcp/tools`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

// ═══════════════════════════════════════════════════════════════════════
// Module manager
// ═══════════════════════════════════════════════════════════════════════

/// Provisions modules, routes tool calls through the middleware chain, and
/// tears everything down on shutdown.
pub struct ModuleManager {
    deps: SharedDeps,
    modules: Vec<Box<dyn ToolModule>>,
    tools: HashMap<String, Arc<dyn Tool>>,
    middleware: Vec<Arc<dyn Middleware>>,
    catalog: Arc<Catalog>,
}

impl ModuleManager {
    /// Provision every enabled module and build the tool table.
    pub fn provision(deps: SharedDeps, disabled: &[String]) -> Result<Self> {
        let mut modules = Vec::new();
        let mut tools: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        let mut catalog = Catalog::default();

        for mut module in builtin_modules() {
            let info = module.info();
            if disabled.iter().any(|d| d == info.id) {
                info!(module = info.id, "module disabled by configuration");
                continue;
            }
            module.provision(&deps)?;
            module.validate()?;

            let mut catalog_tools = Vec::new();
            for tool in module.tools() {
                let name = tool.name().to_string();
                catalog_tools.push(CatalogTool {
                    name: name.clone(),
                    description: tool.description().to_string(),
                    input_schema: tool.parameters_schema(),
                });
                if tools.insert(name.clone(), tool).is_some() {
                    return Err(Error::Config(format!("duplicate tool name: {}", name)));
                }
            }
            catalog.modules.push(CatalogModule {
                info: info.clone(),
                tools: catalog_tools,
            });
            debug!(module = info.id, "module provisioned");
            modules.push(module);
        }

        let mut middleware: Vec<Arc<dyn Middleware>> =
            vec![Arc::new(ArgumentShapeMiddleware), Arc::new(TimingMiddleware)];
        middleware.sort_by_key(|m| m.priority());

        info!(
            modules = modules.len(),
            tools = tools.len(),
            "module manager provisioned"
        );
        Ok(Self {
            deps,
            modules,
            tools,
            middleware,
            catalog: Arc::new(catalog),
        })
    }

    pub fn catalog(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog)
    }

    /// Tool descriptors for listings.
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        let mut out: Vec<ToolDescriptor> = self
            .tools
            .values()
            .map(|tool| ToolDescriptor {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.parameters_schema(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Dispatch one tool call. Never returns an `Err`: every failure is an
    /// `isError` envelope.
    pub async fn call(
        &self,
        name: &str,
        arguments: Value,
        cancel: CancellationToken,
    ) -> ToolResponse {
        let Some(tool) = self.tools.get(name) else {
            return ToolResponse::error(format!("unknown tool: {}", name));
        };

        let ctx = ToolContext {
            deps: self.deps.clone(),
            cancel,
            catalog: Arc::clone(&self.catalog),
        };

        let mut params = arguments;
        for middleware in &self.middleware {
            if !pattern_matches(middleware.pattern(), name) {
                continue;
            }
            params = match middleware.before(name, params).await {
                Ok(p) => p,
                Err(e) => return ToolResponse::error(e.to_string()),
            };
        }

        // The timing marker is internal; strip before handler decode.
        let elapsed_from = params
            .as_object_mut()
            .and_then(|map| map.remove("__started_at_ms"))
            .and_then(|v| v.as_i64());

        let mut result = match tool.execute(params, &ctx).await {
            Ok(value) => value,
            Err(e) => {
                warn!(tool = name, error = %e, "tool call failed");
                return ToolResponse::error(e.to_string());
            }
        };

        if let (Some(started), Value::Object(map)) = (elapsed_from, &mut result) {
            let elapsed = chrono::Utc::now().timestamp_millis() - started;
            map.insert("elapsed_ms".to_string(), Value::from(elapsed.max(0)));
        }

        for middleware in self.middleware.iter().rev() {
            if !pattern_matches(middleware.pattern(), name) {
                continue;
            }
            result = match middleware.after(name, result).await {
                Ok(r) => r,
                Err(e) => return ToolResponse::error(e.to_string()),
            };
        }

        ToolResponse::ok(&result)
    }

    /// Call every module's `cleanup` (stopping watchers and workers).
    pub async fn shutdown(&self) {
        for module in &self.modules {
            if let Err(e) = module.cleanup().await {
                warn!(module = module.info().id, error = %e, "module cleanup failed");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::config::CodeConfig;
    use crate::store::testutil::memory_store;

    /// A fully provisioned manager over an in-memory store.
    pub async fn manager() -> ModuleManager {
        let store = memory_store().await;
        let indexer = CodeIndexer::new(
            store.clone(),
            &CodeConfig {
                workers: Some(1),
                ..Default::default()
            },
        );
        ModuleManager::provision(SharedDeps { store, indexer }, &[]).unwrap()
    }

    pub async fn call_ok(manager: &ModuleManager, name: &str, args: Value) -> Value {
        let response = manager.call(name, args, CancellationToken::new()).await;
        assert!(
            !response.is_error,
            "{} failed: {}",
            name, response.content[0].text
        );
        serde_json::from_str(&response.content[0].text).unwrap()
    }

    pub async fn call_err(manager: &ModuleManager, name: &str, args: Value) -> String {
        let response = manager.call(name, args, CancellationToken::new()).await;
        assert!(response.is_error, "{} unexpectedly succeeded", name);
        response.content[0].text.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::{call_err, call_ok, manager};
    use super::*;
    use serde_json::json;

    #[test]
    fn patterns_match_suffix_wildcards() {
        assert!(pattern_matches("*", "anything"));
        assert!(pattern_matches("memory_*", "memory_save_fact"));
        assert!(!pattern_matches("memory_*", "kb_search"));
        assert!(pattern_matches("kb_search", "kb_search"));
        assert!(!pattern_matches("kb_search", "kb_search_extra"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn manager_lists_tools_from_every_module() {
        let manager = manager().await;
        let names: Vec<String> = manager.list_tools().into_iter().map(|t| t.name).collect();
        for expected in [
            "memory_save_fact",
            "memory_search_vectors",
            "kb_add_document",
            "graph_create_entity",
            "event_save",
            "code_index_project",
            "how_to_use",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
        manager.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unknown_tool_is_an_error_envelope() {
        let manager = manager().await;
        let response = manager
            .call("no_such_tool", json!({}), CancellationToken::new())
            .await;
        assert!(response.is_error);
        assert!(response.content[0].text.contains("unknown tool"));
        manager.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn non_object_arguments_rejected_by_middleware() {
        let manager = manager().await;
        let message = call_err(&manager, "memory_get_fact", json!([1, 2, 3])).await;
        assert!(message.contains("must be an object"), "{message}");
        manager.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn successful_calls_carry_elapsed_time() {
        let manager = manager().await;
        call_ok(
            &manager,
            "memory_save_fact",
            json!({"user_id": "u", "key": "k", "value": 1}),
        )
        .await;
        let result = call_ok(&manager, "memory_get_fact", json!({"user_id": "u", "key": "k"})).await;
        assert!(result.get("elapsed_ms").is_some());
        manager.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disabled_modules_are_skipped() {
        let store = crate::store::testutil::memory_store().await;
        let indexer = CodeIndexer::new(
            store.clone(),
            &crate::config::CodeConfig {
                workers: Some(1),
                ..Default::default()
            },
        );
        let manager = ModuleManager::provision(
            SharedDeps { store, indexer },
            &["graph".to_string()],
        )
        .unwrap();
        let names: Vec<String> = manager.list_tools().into_iter().map(|t| t.name).collect();
        assert!(!names.iter().any(|n| n.starts_with("graph_")));
        assert!(names.iter().any(|n| n.starts_with("memory_")));
        manager.shutdown().await;
    }
}
