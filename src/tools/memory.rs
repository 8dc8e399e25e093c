//! Facts and vector-memory tools (`memory_*`).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{decode_args, ModuleInfo, SharedDeps, Tool, ToolContext, ToolModule};
use crate::error::Result;

#[derive(Default)]
pub struct MemoryModule {
    deps: Option<SharedDeps>,
}

#[async_trait]
impl ToolModule for MemoryModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            id: "memory",
            name: "Memory",
            description: "Scoped key-value facts and vector-embedded memories",
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    fn provision(&mut self, deps: &SharedDeps) -> Result<()> {
        self.deps = Some(deps.clone());
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.deps
            .as_ref()
            .map(|_| ())
            .ok_or_else(|| crate::error::Error::Config("memory module not provisioned".into()))
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        vec![
            Arc::new(SaveFact),
            Arc::new(GetFact),
            Arc::new(DeleteFact),
            Arc::new(ListFacts),
            Arc::new(SaveVector),
            Arc::new(SearchVectors),
            Arc::new(DeleteVector),
        ]
    }
}

// ============ Facts ============

#[derive(Deserialize)]
struct FactKeyArgs {
    user_id: String,
    key: String,
}

struct SaveFact;

#[async_trait]
impl Tool for SaveFact {
    fn name(&self) -> &str {
        "memory_save_fact"
    }

    fn description(&self) -> &str {
        "Save (or overwrite) a fact under a user-scoped key"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_id": { "type": "string", "description": "Owner of the fact" },
                "key": { "type": "string", "description": "Fact key, unique per user" },
                "value": { "description": "Any JSON value" }
            },
            "required": ["user_id", "key", "value"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            user_id: String,
            key: String,
            value: Value,
        }
        let args: Args = decode_args(params)?;
        ctx.deps
            .store
            .save_fact(&args.user_id, &args.key, &args.value)
            .await?;
        Ok(json!({ "saved": true, "key": args.key }))
    }
}

struct GetFact;

#[async_trait]
impl Tool for GetFact {
    fn name(&self) -> &str {
        "memory_get_fact"
    }

    fn description(&self) -> &str {
        "Fetch the value stored under a user-scoped key"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_id": { "type": "string" },
                "key": { "type": "string" }
            },
            "required": ["user_id", "key"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let args: FactKeyArgs = decode_args(params)?;
        let value = ctx.deps.store.get_fact(&args.user_id, &args.key).await?;
        Ok(json!({ "key": args.key, "found": value.is_some(), "value": value }))
    }
}

struct DeleteFact;

#[async_trait]
impl Tool for DeleteFact {
    fn name(&self) -> &str {
        "memory_delete_fact"
    }

    fn description(&self) -> &str {
        "Delete a fact by key"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_id": { "type": "string" },
                "key": { "type": "string" }
            },
            "required": ["user_id", "key"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let args: FactKeyArgs = decode_args(params)?;
        let deleted = ctx.deps.store.delete_fact(&args.user_id, &args.key).await?;
        Ok(json!({ "deleted": deleted }))
    }
}

struct ListFacts;

#[async_trait]
impl Tool for ListFacts {
    fn name(&self) -> &str {
        "memory_list_facts"
    }

    fn description(&self) -> &str {
        "List every fact stored for a user"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_id": { "type": "string" }
            },
            "required": ["user_id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            user_id: String,
        }
        let args: Args = decode_args(params)?;
        let facts = ctx.deps.store.list_facts(&args.user_id).await?;
        Ok(json!({ "count": facts.len(), "facts": facts }))
    }
}

// ============ Vector memories ============

struct SaveVector;

#[async_trait]
impl Tool for SaveVector {
    fn name(&self) -> &str {
        "memory_save_vector"
    }

    fn description(&self) -> &str {
        "Embed free-form text and store it as a searchable memory"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_id": { "type": "string" },
                "content": { "type": "string", "description": "Text to remember" },
                "metadata": { "type": "object", "description": "Arbitrary JSON attached to the memory" }
            },
            "required": ["user_id", "content"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            user_id: String,
            content: String,
            #[serde(default)]
            metadata: Value,
        }
        let mut args: Args = decode_args(params)?;
        if args.metadata.is_null() {
            args.metadata = json!({});
        }
        let id = ctx
            .deps
            .store
            .save_vector(&args.user_id, &args.content, &args.metadata, &ctx.cancel)
            .await?;
        Ok(json!({ "id": id }))
    }
}

struct SearchVectors;

#[async_trait]
impl Tool for SearchVectors {
    fn name(&self) -> &str {
        "memory_search_vectors"
    }

    fn description(&self) -> &str {
        "Semantic search over a user's memories"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_id": { "type": "string" },
                "query": { "type": "string" },
                "k": { "type": "integer", "description": "Max results (default 10, cap 100)" }
            },
            "required": ["user_id", "query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            user_id: String,
            query: String,
            #[serde(default)]
            k: Option<usize>,
        }
        let args: Args = decode_args(params)?;
        let results = ctx
            .deps
            .store
            .search_vectors(&args.user_id, &args.query, args.k, &ctx.cancel)
            .await?;
        let hits: Vec<Value> = results
            .iter()
            .map(|hit| {
                json!({
                    "id": hit.id,
                    "score": hit.score,
                    "content": hit.record.content,
                    "metadata": hit.record.metadata,
                })
            })
            .collect();
        Ok(json!({ "count": hits.len(), "results": hits }))
    }
}

struct DeleteVector;

#[async_trait]
impl Tool for DeleteVector {
    fn name(&self) -> &str {
        "memory_delete_vector"
    }

    fn description(&self) -> &str {
        "Delete a vector memory by id"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Memory id (vector_memories:<uuid>)" }
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            id: String,
        }
        let args: Args = decode_args(params)?;
        let deleted = ctx.deps.store.delete_vector(&args.id).await?;
        Ok(json!({ "deleted": deleted }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{call_err, call_ok, manager};
    use serde_json::json;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fact_roundtrip_through_tools() {
        let manager = manager().await;
        call_ok(
            &manager,
            "memory_save_fact",
            json!({"user_id": "alice", "key": "tz", "value": "Europe/Madrid"}),
        )
        .await;
        let got = call_ok(
            &manager,
            "memory_get_fact",
            json!({"user_id": "alice", "key": "tz"}),
        )
        .await;
        assert_eq!(got["found"], true);
        assert_eq!(got["value"], "Europe/Madrid");

        let deleted = call_ok(
            &manager,
            "memory_delete_fact",
            json!({"user_id": "alice", "key": "tz"}),
        )
        .await;
        assert_eq!(deleted["deleted"], true);
        let gone = call_ok(
            &manager,
            "memory_get_fact",
            json!({"user_id": "alice", "key": "tz"}),
        )
        .await;
        assert_eq!(gone["found"], false);
        manager.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn vector_save_and_search() {
        let manager = manager().await;
        for content in [
            "I like dark mode",
            "Meeting with John Friday",
            "Favorite language is Python",
        ] {
            call_ok(
                &manager,
                "memory_save_vector",
                json!({"user_id": "u1", "content": content}),
            )
            .await;
        }
        let results = call_ok(
            &manager,
            "memory_search_vectors",
            json!({"user_id": "u1", "query": "dark mode language preferences", "k": 2}),
        )
        .await;
        assert_eq!(results["count"], 2);
        let first_score = results["results"][0]["score"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&first_score));
        manager.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_arguments_are_validation_errors() {
        let manager = manager().await;
        let message = call_err(&manager, "memory_save_fact", json!({"user_id": "u"})).await;
        assert!(message.contains("key") || message.contains("missing"), "{message}");
        manager.shutdown().await;
    }
}
